//! Day-by-day workload forecast for one student.
//!
//! Every subject is walked forward through [`progression::advance`] one
//! calendar day at a time until all of them finish. Each day yields a cost
//! vector (minutes per subject); identical vectors are folded into one
//! [`StudyTimePattern`] with an occurrence count.
//!
//! Nothing here touches live trackers: the per-subject state is private to
//! the call and dropped when it returns.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;
use thiserror::Error;

use crate::error::{InvalidStateTransition, MissingReferenceData};
use crate::model::{
    BlockId, BlockSequence, DailyCost, EngineSettings, ForecastReport, RestCalendar, StudentId,
    StudyTimePattern, SubjectId, Tracker, next_day,
};
use crate::progression::{self, DayKind, Portion, ProgressState, ProgressionError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ForecastError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),

    #[error(transparent)]
    Invalid(#[from] InvalidStateTransition),

    #[error("subject {subject_id} appears twice in the forecast input")]
    DuplicateSubject { subject_id: SubjectId },

    #[error("forecast for student {student_id} did not finish within {days} days")]
    HorizonExceeded { student_id: StudentId, days: u32 },

    #[error("daily minutes for subject {subject_id} overflow")]
    CostOverflow { subject_id: SubjectId },
}

impl From<ProgressionError> for ForecastError {
    fn from(err: ProgressionError) -> Self {
        match err {
            ProgressionError::Missing(e) => ForecastError::Missing(e),
            ProgressionError::Invalid(e) => ForecastError::Invalid(e),
        }
    }
}

/// Expected minutes per item, by block.
pub trait AverageItemTime {
    fn minutes_per_item(&self, block_id: BlockId) -> Option<u32>;
}

impl AverageItemTime for HashMap<BlockId, u32> {
    fn minutes_per_item(&self, block_id: BlockId) -> Option<u32> {
        self.get(&block_id).copied()
    }
}

impl AverageItemTime for BTreeMap<BlockId, u32> {
    fn minutes_per_item(&self, block_id: BlockId) -> Option<u32> {
        self.get(&block_id).copied()
    }
}

// ─── INPUT ─────────────────────────────────────────────────────────────────────

/// One subject as the forecast sees it.
#[derive(Debug, Clone)]
pub struct SubjectPlan {
    pub sequence: BlockSequence,
    pub rests: RestCalendar,
    /// Live tracker to start from; `None` starts at the first block.
    pub tracker: Option<Tracker>,
}

impl SubjectPlan {
    #[must_use]
    pub fn from_start(sequence: BlockSequence, rests: RestCalendar) -> Self {
        Self {
            sequence,
            rests,
            tracker: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentPlan {
    pub student_id: StudentId,
    pub start_date: NaiveDate,
    pub subjects: Vec<SubjectPlan>,
}

// ─── SIMULATION STATE ──────────────────────────────────────────────────────────

/// Everything the simulator tracks for one subject between days.
#[derive(Debug, Clone)]
struct SubjectSimulationState<'a> {
    progress: ProgressState,
    sequence: &'a BlockSequence,
    rests: &'a RestCalendar,
    /// Minutes per item for every block the subject can still reach.
    minutes: HashMap<BlockId, u32>,
}

impl<'a> SubjectSimulationState<'a> {
    fn new(plan: &'a SubjectPlan, times: &impl AverageItemTime) -> Result<Self, ForecastError> {
        let sequence = &plan.sequence;
        let progress = match &plan.tracker {
            // A disabled subject hands out nothing.
            Some(t) if !t.is_enabled => {
                let mut p = ProgressState::from_tracker(t, sequence)?;
                p.finished = true;
                p
            }
            Some(t) => ProgressState::from_tracker(t, sequence)?,
            None => ProgressState::start_of(sequence.first()),
        };

        let mut minutes = HashMap::new();
        let reachable = std::iter::once(sequence.require(progress.block.id)?)
            .chain(sequence.after(progress.block.id));
        for block in reachable {
            let m = times
                .minutes_per_item(block.id())
                .ok_or(MissingReferenceData::AverageTime(block.id()))?;
            minutes.insert(block.id(), m);
        }

        Ok(Self {
            progress,
            sequence,
            rests: &plan.rests,
            minutes,
        })
    }

    fn subject_id(&self) -> SubjectId {
        self.sequence.subject_id()
    }

    fn not_started(&self, date: NaiveDate) -> bool {
        self.sequence
            .get(self.progress.block.id)
            .and_then(|b| b.start_date())
            .is_some_and(|start| date < start)
    }

    fn cost_of(&self, portion: Option<Portion>) -> Result<u32, ForecastError> {
        let Some(p) = portion else { return Ok(0) };
        let per_item = self
            .minutes
            .get(&p.block_id)
            .copied()
            .ok_or(MissingReferenceData::AverageTime(p.block_id))?;
        p.count.checked_mul(per_item).ok_or(ForecastError::CostOverflow {
            subject_id: self.subject_id(),
        })
    }

    /// Simulate one day and return the subject's cost in minutes.
    fn step(&mut self, date: NaiveDate) -> Result<u32, ForecastError> {
        if self.progress.finished || self.not_started(date) {
            return Ok(0);
        }
        let day = if self.rests.is_rest_day(date) {
            DayKind::Rest
        } else {
            DayKind::Study
        };
        let step = progression::advance(&self.progress, day, self.sequence)?;
        let cost = self
            .cost_of(step.current)?
            .checked_add(self.cost_of(step.next)?)
            .ok_or(ForecastError::CostOverflow {
                subject_id: self.subject_id(),
            })?;
        self.progress = step.state;
        Ok(cost)
    }
}

// ─── PATTERN TABLE ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PatternTable {
    rows: Vec<StudyTimePattern>,
    index: HashMap<DailyCost, usize>,
}

impl PatternTable {
    fn record(&mut self, cost: DailyCost) {
        if let Some(&idx) = self.index.get(&cost) {
            self.rows[idx].occurrence_count += 1;
            return;
        }
        let order = u32::try_from(self.rows.len() + 1).unwrap_or(u32::MAX);
        self.index.insert(cost.clone(), self.rows.len());
        self.rows.push(StudyTimePattern {
            order,
            per_subject_minutes: cost,
            occurrence_count: 1,
        });
    }

    fn into_rows(mut self) -> Vec<StudyTimePattern> {
        self.rows.sort_by_key(|r| r.order);
        self.rows
    }
}

// ─── ENTRY POINTS ──────────────────────────────────────────────────────────────

/// Forecast one student until every subject is exhausted.
///
/// # Errors
///
/// The forecast is all-or-nothing; any of these fails the whole run:
/// - `Missing` for an absent average item time or successor block
/// - `Invalid` for a tracker snapshot outside its block's bounds
/// - `DuplicateSubject` if two plans share a subject
/// - `HorizonExceeded` if the subjects are still running after
///   `settings.forecast_horizon_days()` days
pub fn forecast(
    plan: &StudentPlan,
    times: &impl AverageItemTime,
    settings: &EngineSettings,
) -> Result<ForecastReport, ForecastError> {
    let mut states = BTreeMap::new();
    for subject in &plan.subjects {
        let state = SubjectSimulationState::new(subject, times)?;
        let subject_id = state.subject_id();
        if states.insert(subject_id, state).is_some() {
            return Err(ForecastError::DuplicateSubject { subject_id });
        }
    }

    let horizon = settings.forecast_horizon_days();
    let mut table = PatternTable::default();
    let mut date = plan.start_date;
    let mut days = 0u32;

    while !states.values().all(|s| s.progress.finished) {
        if days >= horizon {
            return Err(ForecastError::HorizonExceeded {
                student_id: plan.student_id,
                days: horizon,
            });
        }
        let mut cost = DailyCost::new();
        for (subject_id, state) in &mut states {
            cost.insert(*subject_id, state.step(date)?);
        }
        debug!("student {} day {date}: {cost:?}", plan.student_id);
        table.record(cost);
        date = next_day(date);
        days += 1;
    }

    let patterns = table.into_rows();
    let total_days = patterns.iter().map(|p| p.occurrence_count).sum();
    info!(
        "forecast for student {}: {} patterns over {} days",
        plan.student_id,
        patterns.len(),
        total_days
    );
    Ok(ForecastReport {
        student_id: plan.student_id,
        start_date: plan.start_date,
        patterns,
        total_days,
    })
}

/// Forecast many students in parallel; each result stands on its own.
pub fn forecast_students<T>(
    plans: &[StudentPlan],
    times: &T,
    settings: &EngineSettings,
) -> Vec<(StudentId, Result<ForecastReport, ForecastError>)>
where
    T: AverageItemTime + Sync,
{
    plans
        .par_iter()
        .map(|plan| (plan.student_id, forecast(plan, times, settings)))
        .collect()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
