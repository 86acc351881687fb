//! The block/lap/space decision table shared by the forecast and the live tracker.
//!
//! One call to [`advance`] is one distribution opportunity for one subject:
//! a simulated day in the forecast, or a completed item on the live tracker.
//! Rules are tested in a fixed priority order and the first match wins:
//!
//! 1. subject already finished: nothing happens
//! 2. rest day: nothing happens (the caller decides what a rest day is)
//! 3. cooldown pending: count it down
//! 4. the release stays inside the block: hand out `speed` items
//! 5. the release ends exactly on the block end with laps left: start the next lap
//! 6. ... with no laps left: finish the subject or enter the next block
//! 7. the release overflows the block end with laps left: wrap into the next lap
//! 8. ... with no laps left: finish the subject, or hand out the block tail
//!    plus the head of the next block and enter it

use std::cmp::Ordering;

use log::debug;
use thiserror::Error;

use crate::error::{InvalidStateTransition, MissingReferenceData};
use crate::model::{Block, BlockId, BlockParams, BlockSequence, Tracker};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Invalid(#[from] InvalidStateTransition),
}

/// Cursor state for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub block: BlockParams,
    pub item_cursor: u32,
    pub remaining_space: u32,
    pub current_lap: u32,
    pub finished: bool,
}

impl ProgressState {
    /// State on entering `block`: first item, first lap, no cooldown.
    #[must_use]
    pub fn start_of(block: &Block) -> Self {
        Self {
            block: block.params(),
            item_cursor: 1,
            remaining_space: 0,
            current_lap: 1,
            finished: false,
        }
    }

    /// Block and in-block position of the next item to hand out, or `None`
    /// once the subject is complete.
    #[must_use]
    pub fn next_position(&self, sequence: &BlockSequence) -> Option<(BlockId, u32)> {
        if self.finished {
            return None;
        }
        if self.item_cursor <= self.block.size {
            return Some((self.block.id, self.item_cursor));
        }
        if self.current_lap < self.block.lap {
            return Some((self.block.id, 1));
        }
        sequence.next_after(self.block.id).map(|b| (b.id(), 1))
    }

    /// Progress state of a live tracker, checked against its current block.
    ///
    /// # Errors
    ///
    /// - `Missing(Block)` if the tracker points at a block outside `sequence`
    /// - `Invalid` if the tracker's fields are outside that block's bounds
    pub fn from_tracker(tracker: &Tracker, sequence: &BlockSequence) -> Result<Self, ProgressionError> {
        let block = sequence.require(tracker.current_block_id)?;
        tracker.check_against(block)?;
        Ok(Self {
            block: block.params(),
            item_cursor: tracker.item_cursor,
            remaining_space: tracker.remaining_space,
            current_lap: tracker.current_lap,
            finished: tracker.finished,
        })
    }

    /// Copy the cursor fields back onto `tracker`.
    pub fn write_to(&self, tracker: &mut Tracker) {
        tracker.current_block_id = self.block.id;
        tracker.item_cursor = self.item_cursor;
        tracker.remaining_space = self.remaining_space;
        tracker.current_lap = self.current_lap;
        tracker.finished = self.finished;
    }

    fn validate(&self) -> Result<(), InvalidStateTransition> {
        let b = &self.block;
        if self.item_cursor == 0 || self.item_cursor > b.size + 1 {
            return Err(InvalidStateTransition::CursorOutOfRange {
                block_id: b.id,
                cursor: self.item_cursor,
                size: b.size,
            });
        }
        if self.current_lap == 0 || self.current_lap > b.lap {
            return Err(InvalidStateTransition::LapOutOfRange {
                block_id: b.id,
                current: self.current_lap,
                lap: b.lap,
            });
        }
        if self.remaining_space > b.space {
            return Err(InvalidStateTransition::SpaceOutOfRange {
                block_id: b.id,
                remaining: self.remaining_space,
                space: b.space,
            });
        }
        Ok(())
    }
}

/// Whether the subject may receive items on this opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Study,
    Rest,
}

/// Which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Finished,
    Resting,
    Cooldown,
    Released,
    Lap,
    NextBlock,
    Completed,
}

/// Items handed out from one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Portion {
    pub block_id: BlockId,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub state: ProgressState,
    pub transition: Transition,
    /// Items from the block the state pointed at before the call.
    pub current: Option<Portion>,
    /// Head items taken from the following block on an overflowing transition.
    pub next: Option<Portion>,
}

impl Advance {
    fn idle(state: ProgressState, transition: Transition) -> Self {
        Self {
            state,
            transition,
            current: None,
            next: None,
        }
    }

    /// Total items handed out by this step.
    #[must_use]
    pub fn released(&self) -> u32 {
        self.current.map_or(0, |p| p.count) + self.next.map_or(0, |p| p.count)
    }
}

/// Run one distribution opportunity. Pure: `state` is not modified.
///
/// # Errors
///
/// - `Invalid` if the cursor, lap or cooldown are outside the block's bounds
/// - `Missing(NextBlock)` if a non-tail block has no successor in `sequence`
pub fn advance(
    state: &ProgressState,
    day: DayKind,
    sequence: &BlockSequence,
) -> Result<Advance, ProgressionError> {
    if state.finished {
        return Ok(Advance::idle(*state, Transition::Finished));
    }
    state.validate()?;
    if day == DayKind::Rest {
        return Ok(Advance::idle(*state, Transition::Resting));
    }
    if state.remaining_space > 0 {
        let mut next = *state;
        next.remaining_space -= 1;
        return Ok(Advance::idle(next, Transition::Cooldown));
    }

    let b = state.block;
    let last = state.item_cursor + b.speed - 1;
    let laps_left = state.current_lap < b.lap;
    let mut next = *state;
    next.remaining_space = b.space - 1;

    let step = match (last.cmp(&b.size), laps_left) {
        (Ordering::Less, _) => {
            next.item_cursor += b.speed;
            released(next, Transition::Released, b.id, b.speed)
        }
        (Ordering::Equal, true) => {
            next.item_cursor = 1;
            next.current_lap += 1;
            released(next, Transition::Lap, b.id, b.speed)
        }
        (Ordering::Greater, true) => {
            next.item_cursor = last - b.size + 1;
            next.current_lap += 1;
            released(next, Transition::Lap, b.id, b.speed)
        }
        (Ordering::Equal, false) => leave_block(state, b.speed, 0, sequence)?,
        (Ordering::Greater, false) => {
            let tail = (b.size + 1).saturating_sub(state.item_cursor);
            leave_block(state, tail, last - b.size, sequence)?
        }
    };

    debug!(
        "block {} cursor {} lap {} -> {:?}, released {}",
        b.id,
        state.item_cursor,
        state.current_lap,
        step.transition,
        step.released()
    );
    Ok(step)
}

fn released(state: ProgressState, transition: Transition, block_id: BlockId, count: u32) -> Advance {
    Advance {
        state,
        transition,
        current: Some(Portion { block_id, count }),
        next: None,
    }
}

/// Last lap of the block is exhausted by this release.
fn leave_block(
    state: &ProgressState,
    tail: u32,
    overflow: u32,
    sequence: &BlockSequence,
) -> Result<Advance, ProgressionError> {
    let b = state.block;
    let current = (tail > 0).then_some(Portion {
        block_id: b.id,
        count: tail,
    });

    if b.is_tail {
        let mut done = *state;
        done.finished = true;
        done.item_cursor = b.size + 1;
        done.remaining_space = 0;
        return Ok(Advance {
            state: done,
            transition: Transition::Completed,
            current,
            next: None,
        });
    }

    let following = sequence
        .next_after(b.id)
        .ok_or(MissingReferenceData::NextBlock(b.id))?;
    let mut entered = ProgressState::start_of(following);
    // The cooldown earned by today's release belongs to the old block; keep it
    // within the new block's bounds.
    entered.remaining_space = (b.space - 1).min(following.space());

    let head = overflow.min(following.speed()).min(following.size());
    entered.item_cursor += head;
    let next = (head > 0).then_some(Portion {
        block_id: following.id(),
        count: head,
    });

    // The head swallowed the whole of a single-lap final block.
    let transition = if following.is_tail() && following.lap() == 1 && head == following.size() {
        entered.finished = true;
        entered.remaining_space = 0;
        Transition::Completed
    } else {
        Transition::NextBlock
    };

    Ok(Advance {
        state: entered,
        transition,
        current,
        next,
    })
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
