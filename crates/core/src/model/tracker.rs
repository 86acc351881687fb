use serde::{Deserialize, Serialize};

use crate::error::InvalidStateTransition;
use crate::model::block::{Block, BlockSequence};
use crate::model::ids::{BlockId, StudentId, SubjectId};

/// Live cursor for one (student, subject).
///
/// `item_cursor` is the 1-based position of the next item to hand out in
/// the current block; `current_lap` starts at 1 whenever a block is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub current_block_id: BlockId,
    pub item_cursor: u32,
    pub remaining_space: u32,
    pub current_lap: u32,
    pub is_resting: bool,
    pub is_enabled: bool,
    pub finished: bool,
    pub remaining_items: u32,
    pub delay_days: u32,
    pub remaining_review_space: u32,
    /// Bumped on every persisted update; guards conditional writes.
    pub version: u64,
}

impl Tracker {
    /// Tracker for a fresh enrollment, pointing at the first item of the first block.
    #[must_use]
    pub fn enroll(student_id: StudentId, sequence: &BlockSequence) -> Self {
        Self {
            student_id,
            subject_id: sequence.subject_id(),
            current_block_id: sequence.first().id(),
            item_cursor: 1,
            remaining_space: 0,
            current_lap: 1,
            is_resting: false,
            is_enabled: true,
            finished: false,
            remaining_items: sequence.total_items(),
            delay_days: 0,
            remaining_review_space: 0,
            version: 0,
        }
    }

    /// Check the cursor fields against the block the tracker points at.
    ///
    /// A cursor one past the block end is allowed: it means the block's
    /// last items were released early as the head of a block transition.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidStateTransition` found.
    pub fn check_against(&self, block: &Block) -> Result<(), InvalidStateTransition> {
        if block.id() != self.current_block_id || block.subject_id() != self.subject_id {
            return Err(InvalidStateTransition::ForeignBlock {
                block_id: block.id(),
                subject_id: self.subject_id,
            });
        }
        if self.item_cursor == 0 || self.item_cursor > block.size() + 1 {
            return Err(InvalidStateTransition::CursorOutOfRange {
                block_id: block.id(),
                cursor: self.item_cursor,
                size: block.size(),
            });
        }
        if self.current_lap == 0 || self.current_lap > block.lap() {
            return Err(InvalidStateTransition::LapOutOfRange {
                block_id: block.id(),
                current: self.current_lap,
                lap: block.lap(),
            });
        }
        if self.remaining_space > block.space() {
            return Err(InvalidStateTransition::SpaceOutOfRange {
                block_id: block.id(),
                remaining: self.remaining_space,
                space: block.space(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::block::tests::sequence;

    #[test]
    fn enroll_points_at_first_item() {
        let seq = sequence(1, &[(2, 1, 1, 4), (1, 1, 2, 3)]);
        let tracker = Tracker::enroll(StudentId::new(9), &seq);
        assert_eq!(tracker.current_block_id, BlockId::new(101));
        assert_eq!(tracker.item_cursor, 1);
        assert_eq!(tracker.current_lap, 1);
        assert_eq!(tracker.remaining_items, 4 + 6);
        assert!(tracker.check_against(seq.first()).is_ok());
    }

    #[test]
    fn check_against_flags_out_of_range_fields() {
        let seq = sequence(1, &[(2, 2, 1, 4)]);
        let block = seq.first();
        let mut tracker = Tracker::enroll(StudentId::new(9), &seq);

        tracker.item_cursor = 6;
        assert!(matches!(
            tracker.check_against(block),
            Err(InvalidStateTransition::CursorOutOfRange { cursor: 6, .. })
        ));

        tracker.item_cursor = 5;
        assert!(tracker.check_against(block).is_ok());

        tracker.current_lap = 2;
        assert!(matches!(
            tracker.check_against(block),
            Err(InvalidStateTransition::LapOutOfRange { .. })
        ));

        tracker.current_lap = 1;
        tracker.remaining_space = 3;
        assert!(matches!(
            tracker.check_against(block),
            Err(InvalidStateTransition::SpaceOutOfRange { .. })
        ));
    }
}
