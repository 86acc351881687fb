//! Error taxonomy shared by every engine in this crate.
//!
//! Each engine wraps these in its own error enum; callers decide whether to
//! retry the whole unit of work.

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{BlockId, IrregularId, ItemId, StudentId, SubjectId};

/// A lookup that the enclosing operation cannot do without returned nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MissingReferenceData {
    #[error("subject {0} not found")]
    Subject(SubjectId),

    #[error("subject {0} has no blocks")]
    NoBlocks(SubjectId),

    #[error("block {0} not found")]
    Block(BlockId),

    #[error("block {0} is not the tail but has no successor")]
    NextBlock(BlockId),

    #[error("no average item time for block {0}")]
    AverageTime(BlockId),

    #[error("item {in_block_order} of block {block_id} not found")]
    Item { block_id: BlockId, in_block_order: u32 },

    #[error("item {0} not found")]
    UnknownItem(ItemId),

    #[error("irregular insertion {insertion} targets missing item {in_block_order} of block {block_id}")]
    InsertionTarget {
        insertion: IrregularId,
        block_id: BlockId,
        in_block_order: u32,
    },

    #[error("no tracker for student {student_id} in subject {subject_id}")]
    Tracker {
        student_id: StudentId,
        subject_id: SubjectId,
    },

    #[error("malformed rest period {start}..={end}")]
    MalformedRest { start: NaiveDate, end: NaiveDate },
}

/// A state machine was driven with a combination of fields it does not recognize.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidStateTransition {
    #[error("unrecognized review level {0}")]
    ReviewLevel(i64),

    #[error("unrecognized answer status {0}")]
    AnswerStatus(i64),

    #[error("tracker for student {student_id} in subject {subject_id} is disabled")]
    TrackerDisabled {
        student_id: StudentId,
        subject_id: SubjectId,
    },

    #[error("item cursor {cursor} is outside block {block_id} (size {size})")]
    CursorOutOfRange {
        block_id: BlockId,
        cursor: u32,
        size: u32,
    },

    #[error("lap {current} is outside 1..={lap} for block {block_id}")]
    LapOutOfRange {
        block_id: BlockId,
        current: u32,
        lap: u32,
    },

    #[error("remaining space {remaining} exceeds space {space} of block {block_id}")]
    SpaceOutOfRange {
        block_id: BlockId,
        remaining: u32,
        space: u32,
    },

    #[error("block {block_id} does not belong to subject {subject_id}")]
    ForeignBlock {
        block_id: BlockId,
        subject_id: SubjectId,
    },

    #[error("insertion {insertion} would renumber already delivered item {overall_order}")]
    DeliveredItem { insertion: IrregularId, overall_order: u32 },
}

/// An update was attempted against state that changed since it was read.
///
/// `expected_version` is set for versioned rows (trackers, items); block
/// dates and insertions are checked against the values that were read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "stale {entity} {key}{}",
    .expected_version.map(|v| format!(": expected version {v}")).unwrap_or_default()
)]
pub struct ConcurrentMutationConflict {
    pub entity: &'static str,
    pub key: String,
    pub expected_version: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_reference() {
        let err = MissingReferenceData::AverageTime(BlockId::new(7));
        assert_eq!(err.to_string(), "no average item time for block 7");

        let err = InvalidStateTransition::ReviewLevel(9);
        assert_eq!(err.to_string(), "unrecognized review level 9");
    }

    #[test]
    fn conflict_message_includes_version() {
        let err = ConcurrentMutationConflict {
            entity: "tracker",
            key: "1/2".into(),
            expected_version: Some(3),
        };
        assert_eq!(err.to_string(), "stale tracker 1/2: expected version 3");

        let err = ConcurrentMutationConflict {
            entity: "block dates",
            key: "subject 4".into(),
            expected_version: None,
        };
        assert_eq!(err.to_string(), "stale block dates subject 4");
    }
}
