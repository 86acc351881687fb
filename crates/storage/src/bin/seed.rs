use std::fmt;

use chrono::{NaiveDate, Utc};
use pacer_core::forecast::{StudentPlan, SubjectPlan, forecast};
use pacer_core::model::{
    Block, BlockDraft, BlockId, BlockSequence, EngineSettings, RestCalendar, StudentId, Subject,
    SubjectId, Tracker,
};
use pacer_core::schedule::{apply_schedule, plan_schedule};
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    student_id: StudentId,
    start: Option<NaiveDate>,
    horizon: u32,
    verbose: bool,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidStudentId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidStart { raw: String },
    InvalidHorizon { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidStudentId { raw } => write!(f, "invalid --student value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidStart { raw } => {
                write!(f, "invalid --start value (expected YYYY-MM-DD): {raw}")
            }
            ArgsError::InvalidHorizon { raw } => write!(f, "invalid --horizon value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("PACER_DB_URL").unwrap_or_else(|_| "sqlite:pacer.sqlite3".into());
        let mut student_id = std::env::var("PACER_STUDENT_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| StudentId::new(1), StudentId::new);
        let mut horizon = std::env::var("PACER_FORECAST_HORIZON")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3650);
        let mut start: Option<NaiveDate> = None;
        let mut verbose = false;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--student" => {
                    let value = require_value(&mut args, "--student")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidStudentId { raw: value.clone() })?;
                    student_id = StudentId::new(parsed);
                }
                "--start" => {
                    let value = require_value(&mut args, "--start")?;
                    let parsed = NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                        .map_err(|_| ArgsError::InvalidStart { raw: value.clone() })?;
                    start = Some(parsed);
                }
                "--horizon" => {
                    let value = require_value(&mut args, "--horizon")?;
                    horizon = value
                        .parse::<u32>()
                        .ok()
                        .filter(|days| *days > 0)
                        .ok_or_else(|| ArgsError::InvalidHorizon { raw: value.clone() })?;
                }
                "-v" | "--verbose" => verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            student_id,
            start,
            horizon,
            verbose,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:pacer.sqlite3)");
    eprintln!("  --student <id>            Student to enroll (default: 1)");
    eprintln!("  --start <YYYY-MM-DD>      First study day (default: today)");
    eprintln!("  --horizon <days>          Forecast horizon (default: 3650)");
    eprintln!("  -v, --verbose             Log engine decisions at debug level");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  PACER_DB_URL, PACER_STUDENT_ID, PACER_FORECAST_HORIZON");
}

fn init_logging(verbose: bool) -> Result<(), log::SetLoggerError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Utc::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level)
        .level_for("sqlx", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}

/// `(name, speed, space, lap, size, minutes per item)`
const SAMPLE_BLOCKS: [(&str, u32, u32, u32, u32, u32); 3] = [
    ("Warm-up", 2, 1, 1, 6, 3),
    ("Core drills", 3, 1, 2, 9, 4),
    ("Review set", 2, 2, 1, 4, 5),
];

fn sample_blocks(subject_id: SubjectId) -> Result<Vec<Block>, Box<dyn std::error::Error>> {
    let last = SAMPLE_BLOCKS.len();
    let mut blocks = Vec::with_capacity(last);
    for (idx, (name, speed, space, lap, size, _)) in SAMPLE_BLOCKS.iter().enumerate() {
        let order = u32::try_from(idx + 1)?;
        let draft = BlockDraft {
            subject_id,
            order,
            name: (*name).to_owned(),
            speed: *speed,
            space: *space,
            lap: *lap,
            size: *size,
            is_tail: idx + 1 == last,
            level: 1,
            start_date: None,
            end_date: None,
        };
        let id = BlockId::new(subject_id.value() * 100 + u64::from(order));
        blocks.push(draft.validate(id)?);
    }
    Ok(blocks)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    init_logging(args.verbose)?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let start = args.start.unwrap_or_else(|| Utc::now().date_naive());
    let settings = EngineSettings::default().with_forecast_horizon(args.horizon);

    let subject_id = SubjectId::new(1);
    let subject = Subject::new(
        subject_id,
        "Arithmetic",
        settings.default_review_speed(),
        settings.default_review_space(),
    )?;
    storage.subjects.upsert_subject(&subject).await?;

    let rests = RestCalendar::empty();
    let sequence = BlockSequence::new(subject_id, sample_blocks(subject_id)?)?;
    let schedule = plan_schedule(&sequence, start, &rests);
    let sequence = BlockSequence::new(subject_id, apply_schedule(sequence, &schedule))?;
    for block in sequence.blocks() {
        storage.blocks.upsert_block(block).await?;
    }

    if storage.items.items_for_subject(subject_id).await?.is_empty() {
        let items = storage.items.insert_items(sequence.provision_items()).await?;
        log::info!("provisioned {} items", items.len());
    }

    for (block, (.., minutes)) in sequence.blocks().iter().zip(SAMPLE_BLOCKS.iter()) {
        storage.average_times.set_average_time(block.id(), *minutes).await?;
    }

    let tracker = match storage.trackers.get_tracker(args.student_id, subject_id).await {
        Ok(existing) => existing,
        Err(storage::StorageError::NotFound) => {
            let fresh = Tracker::enroll(args.student_id, &sequence);
            storage.trackers.insert_tracker(&fresh).await?;
            fresh
        }
        Err(err) => return Err(err.into()),
    };

    let block_ids: Vec<BlockId> = sequence.blocks().iter().map(Block::id).collect();
    let times = storage.average_times.average_times(&block_ids).await?;
    let plan = StudentPlan {
        student_id: args.student_id,
        start_date: start,
        subjects: vec![SubjectPlan {
            sequence,
            rests,
            tracker: Some(tracker),
        }],
    };
    let report = forecast(&plan, &times, &settings)?;
    storage.forecasts.save_forecast(&report).await?;

    println!(
        "Seeded subject {} for student {}: {} days ({} patterns), finishing {} into {}",
        subject_id,
        args.student_id,
        report.total_days,
        report.patterns.len(),
        report.finish_date(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
