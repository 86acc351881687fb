//! Live tracker advancement: one real completion, one distribution step.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;
use thiserror::Error;

use crate::error::{InvalidStateTransition, MissingReferenceData};
use crate::model::{BlockId, BlockSequence, Item, ItemId, Tracker};
use crate::progression::{self, DayKind, ProgressState, ProgressionError, Transition};
use crate::time::days_between;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdvanceError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),

    #[error(transparent)]
    Invalid(#[from] InvalidStateTransition),
}

impl From<ProgressionError> for AdvanceError {
    fn from(err: ProgressionError) -> Self {
        match err {
            ProgressionError::Missing(e) => AdvanceError::Missing(e),
            ProgressionError::Invalid(e) => AdvanceError::Invalid(e),
        }
    }
}

/// Resolves an item position to its id.
pub trait ItemLookup {
    fn item_at(&self, block_id: BlockId, in_block_order: u32) -> Option<ItemId>;
}

impl ItemLookup for [Item] {
    fn item_at(&self, block_id: BlockId, in_block_order: u32) -> Option<ItemId> {
        self.iter()
            .find(|i| i.block_id == block_id && i.in_block_order == in_block_order)
            .map(|i| i.id)
    }
}

impl ItemLookup for HashMap<(BlockId, u32), ItemId> {
    fn item_at(&self, block_id: BlockId, in_block_order: u32) -> Option<ItemId> {
        self.get(&(block_id, in_block_order)).copied()
    }
}

/// Outcome of one live advance.
///
/// `next_item_id` is `None` both while cooling down and once the subject is
/// complete; `subject_complete` tells the two apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerAdvance {
    pub tracker: Tracker,
    /// First item of the batch released by this step.
    pub next_item_id: Option<ItemId>,
    pub subject_complete: bool,
    pub released: u32,
    pub transition: Transition,
    pub remaining_items: u32,
    pub delay_days: u32,
}

impl TrackerAdvance {
    /// True when nothing was handed out because the block is cooling down or resting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.released == 0 && !self.subject_complete
    }
}

/// Advance `tracker` after the student completed its current item.
///
/// The input tracker is untouched; on error the caller keeps the old state
/// and the student keeps their current item.
///
/// # Errors
///
/// - `Invalid(TrackerDisabled)` for a disabled tracker
/// - `Invalid` for cursor fields outside the current block's bounds
/// - `Missing` if the current block, its successor or the next item cannot be found
pub fn advance_tracker<L>(
    tracker: &Tracker,
    sequence: &BlockSequence,
    items: &L,
    today: NaiveDate,
) -> Result<TrackerAdvance, AdvanceError>
where
    L: ItemLookup + ?Sized,
{
    if !tracker.is_enabled {
        return Err(InvalidStateTransition::TrackerDisabled {
            student_id: tracker.student_id,
            subject_id: tracker.subject_id,
        }
        .into());
    }

    let before = ProgressState::from_tracker(tracker, sequence)?;
    let first_position = before.next_position(sequence);
    let day = if tracker.is_resting {
        DayKind::Rest
    } else {
        DayKind::Study
    };
    let step = progression::advance(&before, day, sequence)?;

    let released = step.released();
    let next_item_id = match first_position {
        Some((block_id, in_block_order)) if released > 0 => Some(
            items
                .item_at(block_id, in_block_order)
                .ok_or(MissingReferenceData::Item {
                    block_id,
                    in_block_order,
                })?,
        ),
        _ => None,
    };

    let mut next = tracker.clone();
    step.state.write_to(&mut next);
    next.remaining_items = tracker.remaining_items.saturating_sub(released);
    next.delay_days = delay_days(&step.state, sequence, today);

    debug!(
        "tracker {}/{}: {:?}, released {released}, next item {next_item_id:?}",
        tracker.student_id, tracker.subject_id, step.transition
    );

    Ok(TrackerAdvance {
        subject_complete: next.finished,
        remaining_items: next.remaining_items,
        delay_days: next.delay_days,
        tracker: next,
        next_item_id,
        released,
        transition: step.transition,
    })
}

/// Days the current block has run past its planned end.
fn delay_days(state: &ProgressState, sequence: &BlockSequence, today: NaiveDate) -> u32 {
    if state.finished {
        return 0;
    }
    sequence
        .get(state.block.id)
        .and_then(|b| b.end_date())
        .map_or(0, |end| u32::try_from(days_between(end, today).max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{day, item, sequence};
    use crate::model::StudentId;

    fn items_for(seq: &BlockSequence) -> Vec<Item> {
        let mut out = Vec::new();
        let mut overall = 0;
        let mut id = 0;
        for block in seq.blocks() {
            for pos in 1..=block.size() {
                overall += 1;
                id += 1;
                out.push(item(id, block.id().value(), pos, overall));
            }
        }
        out
    }

    #[test]
    fn walks_items_in_order_then_completes() {
        let seq = sequence(1, &[(1, 1, 1, 3)]);
        let items = items_for(&seq);
        let mut tracker = Tracker::enroll(StudentId::new(1), &seq);

        let mut seen = Vec::new();
        loop {
            let step = advance_tracker(&tracker, &seq, items.as_slice(), day(1)).unwrap();
            if let Some(id) = step.next_item_id {
                seen.push(id.value());
            }
            tracker = step.tracker;
            if step.subject_complete {
                break;
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(tracker.remaining_items, 0);

        let after = advance_tracker(&tracker, &seq, items.as_slice(), day(1)).unwrap();
        assert_eq!(after.next_item_id, None);
        assert!(after.subject_complete);
        assert!(!after.is_idle());
    }

    #[test]
    fn cooldown_is_idle_not_complete() {
        let seq = sequence(1, &[(1, 2, 1, 3)]);
        let items = items_for(&seq);
        let tracker = Tracker::enroll(StudentId::new(1), &seq);

        let first = advance_tracker(&tracker, &seq, items.as_slice(), day(1)).unwrap();
        assert_eq!(first.next_item_id.map(|i| i.value()), Some(1));
        let idle = advance_tracker(&first.tracker, &seq, items.as_slice(), day(2)).unwrap();
        assert_eq!(idle.next_item_id, None);
        assert!(!idle.subject_complete);
        assert!(idle.is_idle());
        assert_eq!(idle.transition, Transition::Cooldown);
    }

    #[test]
    fn overall_order_increases_within_a_lap() {
        let seq = sequence(1, &[(2, 1, 2, 3), (1, 1, 1, 2)]);
        let items = items_for(&seq);
        let mut tracker = Tracker::enroll(StudentId::new(1), &seq);
        let mut prev: Option<(BlockId, u32, u32)> = None;

        while !tracker.finished {
            let step = advance_tracker(&tracker, &seq, items.as_slice(), day(1)).unwrap();
            let id = step.next_item_id.unwrap();
            let overall = items.iter().find(|i| i.id == id).unwrap().overall_order;
            if let Some((block, lap, last)) = prev {
                if block == tracker.current_block_id && lap == tracker.current_lap {
                    assert!(overall > last);
                }
            }
            prev = Some((tracker.current_block_id, tracker.current_lap, overall));
            tracker = step.tracker;
        }
    }

    #[test]
    fn disabled_tracker_is_rejected() {
        let seq = sequence(1, &[(1, 1, 1, 3)]);
        let mut tracker = Tracker::enroll(StudentId::new(1), &seq);
        tracker.is_enabled = false;
        let err = advance_tracker(&tracker, &seq, &HashMap::<(BlockId, u32), ItemId>::new(), day(1)).unwrap_err();
        assert!(matches!(
            err,
            AdvanceError::Invalid(InvalidStateTransition::TrackerDisabled { .. })
        ));
    }

    #[test]
    fn missing_item_leaves_tracker_untouched() {
        let seq = sequence(1, &[(1, 1, 1, 3)]);
        let tracker = Tracker::enroll(StudentId::new(1), &seq);
        let err = advance_tracker(&tracker, &seq, &HashMap::<(BlockId, u32), ItemId>::new(), day(1)).unwrap_err();
        assert_eq!(
            err,
            AdvanceError::Missing(MissingReferenceData::Item {
                block_id: BlockId::new(101),
                in_block_order: 1,
            })
        );
        assert_eq!(tracker.item_cursor, 1);
    }

    #[test]
    fn resting_tracker_hands_out_nothing() {
        let seq = sequence(1, &[(1, 1, 1, 3)]);
        let items = items_for(&seq);
        let mut tracker = Tracker::enroll(StudentId::new(1), &seq);
        tracker.is_resting = true;
        let step = advance_tracker(&tracker, &seq, items.as_slice(), day(1)).unwrap();
        assert_eq!(step.transition, Transition::Resting);
        assert_eq!(step.tracker.item_cursor, 1);
        assert!(step.is_idle());
    }

    #[test]
    fn delay_counts_days_past_block_end() {
        let mut blocks = sequence(1, &[(1, 1, 1, 5)]).into_blocks();
        blocks[0].set_schedule(day(1), day(3));
        let seq = BlockSequence::new(blocks[0].subject_id(), blocks).unwrap();
        let items = items_for(&seq);
        let tracker = Tracker::enroll(StudentId::new(1), &seq);

        let on_time = advance_tracker(&tracker, &seq, items.as_slice(), day(2)).unwrap();
        assert_eq!(on_time.delay_days, 0);
        let late = advance_tracker(&tracker, &seq, items.as_slice(), day(7)).unwrap();
        assert_eq!(late.delay_days, 4);
        assert_eq!(late.remaining_items, 4);
    }
}
