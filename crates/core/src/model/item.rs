use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::InvalidStateTransition;
use crate::model::ids::{BlockId, ItemId, SubjectId};
use crate::model::review::{ReviewState, ReviewTransition};

/// Outcome of the most recent answer on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnswerStatus {
    #[default]
    Unanswered,
    Correct,
    Incorrect,
}

impl AnswerStatus {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            AnswerStatus::Unanswered => 0,
            AnswerStatus::Correct => 1,
            AnswerStatus::Incorrect => 2,
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidStateTransition::AnswerStatus` for values outside `0..=2`.
    pub fn from_i64(value: i64) -> Result<Self, InvalidStateTransition> {
        match value {
            0 => Ok(Self::Unanswered),
            1 => Ok(Self::Correct),
            2 => Ok(Self::Incorrect),
            other => Err(InvalidStateTransition::AnswerStatus(other)),
        }
    }
}

/// A submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Answer {
    pub correct: bool,
    /// The student flagged the item as hard, independent of correctness.
    pub difficult: bool,
}

/// An item waiting for an id, produced by block provisioning and irregular merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub subject_id: SubjectId,
    pub block_id: BlockId,
    pub in_block_order: u32,
    pub overall_order: u32,
}

impl NewItem {
    #[must_use]
    pub fn assign_id(self, id: ItemId) -> Item {
        Item {
            id,
            subject_id: self.subject_id,
            block_id: self.block_id,
            in_block_order: self.in_block_order,
            overall_order: self.overall_order,
            review: ReviewState::default(),
            try_count: 0,
            wrong_count: 0,
            difficult_count: 0,
            answer_status: AnswerStatus::Unanswered,
            last_answered: None,
            review_due_since: None,
            version: 0,
        }
    }
}

/// A single problem inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub subject_id: SubjectId,
    pub block_id: BlockId,
    pub in_block_order: u32,
    pub overall_order: u32,
    pub review: ReviewState,
    pub try_count: u32,
    pub wrong_count: u32,
    pub difficult_count: u32,
    pub answer_status: AnswerStatus,
    pub last_answered: Option<NaiveDate>,
    /// Day the review countdown reached zero; orders the review queue.
    pub review_due_since: Option<NaiveDate>,
    /// Bumped on every persisted answer-state write; guards conditional writes.
    pub version: u64,
}

impl Item {
    /// Record an answer and run the review state machine.
    pub fn record_answer(&mut self, answer: Answer, is_todo: bool, on: NaiveDate) -> ReviewTransition {
        self.try_count += 1;
        if !answer.correct {
            self.wrong_count += 1;
        }
        if answer.difficult {
            self.difficult_count += 1;
        }
        self.answer_status = if answer.correct {
            AnswerStatus::Correct
        } else {
            AnswerStatus::Incorrect
        };
        self.last_answered = Some(on);

        let transition = self.review.answer(answer.correct, is_todo);
        if transition.changed() {
            self.review = transition.to;
            self.review_due_since = None;
        }
        transition
    }

    /// Daily countdown step; stamps `review_due_since` when the item becomes due.
    ///
    /// Returns true if the item became due on this tick.
    pub fn tick_review(&mut self, today: NaiveDate) -> bool {
        let became_due = self.review.tick();
        if became_due {
            self.review_due_since = Some(today);
        }
        became_due
    }
}
