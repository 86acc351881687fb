//! Re-dating of a subject's blocks when a student is delayed or expedited.

use chrono::{Days, NaiveDate};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MissingReferenceData;
use crate::model::{Block, BlockId, BlockSequence, RestCalendar, next_day};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),

    #[error("block {0} has no planned end date to shift from")]
    Undated(BlockId),

    #[error("shifting by {days} days leaves the calendar")]
    OutOfRange { days: i64 },
}

/// New planned dates for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSchedule {
    pub block_id: BlockId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Plan every block back to back from `start`, skipping rest days.
#[must_use]
pub fn plan_schedule(sequence: &BlockSequence, start: NaiveDate, rests: &RestCalendar) -> Vec<BlockSchedule> {
    lay_out(sequence.blocks(), start, rests)
}

/// Shift the current block's end by `shift_days` (positive = delayed,
/// negative = expedited) and re-plan every later block from there.
///
/// The current block keeps its start date. Its end never moves before its
/// start, and no produced date falls on a rest day.
///
/// # Errors
///
/// - `Missing(Block)` if `current` is not in `sequence`
/// - `Undated` if the current block has no planned end date
/// - `OutOfRange` if the shift overflows the calendar
pub fn adjust_schedule(
    sequence: &BlockSequence,
    current: BlockId,
    shift_days: i64,
    rests: &RestCalendar,
) -> Result<Vec<BlockSchedule>, ScheduleError> {
    let block = sequence.require(current)?;
    let end = block.end_date().ok_or(ScheduleError::Undated(current))?;
    let start = block.start_date().unwrap_or(end);

    let mut shifted = shift(end, shift_days).ok_or(ScheduleError::OutOfRange { days: shift_days })?;
    if shifted < start {
        shifted = start;
    }
    let shifted = rests.next_study_day(shifted);

    let mut out = Vec::with_capacity(sequence.blocks().len());
    out.push(BlockSchedule {
        block_id: current,
        start_date: start,
        end_date: shifted,
    });
    out.extend(lay_out(sequence.after(current), next_day(shifted), rests));

    info!(
        "subject {} shifted {shift_days} days from block {current}: {} blocks re-dated",
        sequence.subject_id(),
        out.len()
    );
    Ok(out)
}

/// Apply `schedule` to the matching blocks of `sequence`.
#[must_use]
pub fn apply_schedule(sequence: BlockSequence, schedule: &[BlockSchedule]) -> Vec<Block> {
    let mut blocks = sequence.into_blocks();
    for s in schedule {
        if let Some(block) = blocks.iter_mut().find(|b| b.id() == s.block_id) {
            block.set_schedule(s.start_date, s.end_date);
        }
    }
    blocks
}

fn lay_out(blocks: &[Block], from: NaiveDate, rests: &RestCalendar) -> Vec<BlockSchedule> {
    let mut cursor = from;
    blocks
        .iter()
        .map(|block| {
            let start_date = rests.next_study_day(cursor);
            let end_date = rests.add_study_days(start_date, block.planned_days());
            cursor = next_day(end_date);
            BlockSchedule {
                block_id: block.id(),
                start_date,
                end_date,
            }
        })
        .collect()
}

fn shift(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let magnitude = Days::new(days.unsigned_abs());
    if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubjectId;
    use crate::model::fixtures::{day, rest, sequence};

    /// Two-day block followed by a three-day block, both daily.
    fn dated_sequence() -> BlockSequence {
        let seq = sequence(1, &[(1, 1, 1, 2), (1, 1, 1, 3), (2, 2, 1, 4)]);
        let plan = plan_schedule(&seq, day(1), &RestCalendar::empty());
        BlockSequence::new(SubjectId::new(1), apply_schedule(seq, &plan)).unwrap()
    }

    #[test]
    fn plan_lays_blocks_back_to_back() {
        let seq = dated_sequence();
        let b = seq.blocks();
        assert_eq!((b[0].start_date(), b[0].end_date()), (Some(day(1)), Some(day(2))));
        assert_eq!((b[1].start_date(), b[1].end_date()), (Some(day(3)), Some(day(5))));
        // two events, every other day
        assert_eq!((b[2].start_date(), b[2].end_date()), (Some(day(6)), Some(day(9))));
    }

    #[test]
    fn delay_pushes_remaining_blocks() {
        let seq = dated_sequence();
        let out = adjust_schedule(&seq, BlockId::new(101), 2, &RestCalendar::empty()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].start_date, day(1));
        assert_eq!(out[0].end_date, day(4));
        assert_eq!((out[1].start_date, out[1].end_date), (day(5), day(7)));
        assert_eq!((out[2].start_date, out[2].end_date), (day(8), day(11)));
    }

    #[test]
    fn expedite_never_ends_before_start() {
        let seq = dated_sequence();
        let out = adjust_schedule(&seq, BlockId::new(102), -10, &RestCalendar::empty()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start_date, out[0].end_date), (day(3), day(3)));
        assert_eq!(out[1].start_date, day(4));
    }

    #[test]
    fn dates_skip_adjacent_rest_periods() {
        let seq = dated_sequence();
        let rests = RestCalendar::new(vec![rest(1, 3, 4), rest(1, 5, 5), rest(1, 8, 8)]).unwrap();
        let out = adjust_schedule(&seq, BlockId::new(101), 1, &rests).unwrap();

        // end 2 + 1 = 3 is resting, as are 4 and 5
        assert_eq!(out[0].end_date, day(6));
        // three study days: 7, 9, 10
        assert_eq!((out[1].start_date, out[1].end_date), (day(7), day(10)));
        for s in &out {
            assert!(!rests.is_rest_day(s.end_date));
            assert!(s.start_date == day(1) || !rests.is_rest_day(s.start_date));
        }
    }

    #[test]
    fn undated_current_block_is_rejected() {
        let seq = sequence(1, &[(1, 1, 1, 2)]);
        assert_eq!(
            adjust_schedule(&seq, BlockId::new(101), 1, &RestCalendar::empty()).unwrap_err(),
            ScheduleError::Undated(BlockId::new(101))
        );
        assert!(matches!(
            adjust_schedule(&seq, BlockId::new(999), 1, &RestCalendar::empty()),
            Err(ScheduleError::Missing(MissingReferenceData::Block(_)))
        ));
    }
}
