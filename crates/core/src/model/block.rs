use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{InvalidStateTransition, MissingReferenceData};
use crate::model::ids::{BlockId, SubjectId};
use crate::model::item::NewItem;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BlockError {
    #[error("block name cannot be empty")]
    EmptyName,

    #[error("block order is 1-based and must be > 0")]
    InvalidOrder,

    #[error("speed must be > 0")]
    InvalidSpeed,

    #[error("space must be > 0")]
    InvalidSpace,

    #[error("lap must be > 0")]
    InvalidLap,

    #[error("block size must be > 0")]
    InvalidSize,

    #[error("speed {speed} exceeds block size {size}")]
    SpeedExceedsSize { speed: u32, size: u32 },

    #[error("block end date {end} precedes start date {start}")]
    InvalidDates { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SequenceError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),

    #[error(transparent)]
    Foreign(#[from] InvalidStateTransition),

    #[error("block order gap: expected {expected}, found {found}")]
    OrderGap { expected: u32, found: u32 },

    #[error("tail flag of block {0} does not match its position")]
    TailMismatch(BlockId),
}

//
// ─── BLOCK ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated block fields, as supplied by a coach or read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDraft {
    pub subject_id: SubjectId,
    pub order: u32,
    pub name: String,
    pub speed: u32,
    pub space: u32,
    pub lap: u32,
    pub size: u32,
    pub is_tail: bool,
    pub level: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl BlockDraft {
    /// Validate the draft and attach its id.
    ///
    /// # Errors
    ///
    /// Returns `BlockError` if the name is blank, any pacing field is zero, or
    /// the planned dates are reversed.
    pub fn validate(self, id: BlockId) -> Result<Block, BlockError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(BlockError::EmptyName);
        }
        if self.order == 0 {
            return Err(BlockError::InvalidOrder);
        }
        if self.speed == 0 {
            return Err(BlockError::InvalidSpeed);
        }
        if self.space == 0 {
            return Err(BlockError::InvalidSpace);
        }
        if self.lap == 0 {
            return Err(BlockError::InvalidLap);
        }
        if self.size == 0 {
            return Err(BlockError::InvalidSize);
        }
        if self.speed > self.size {
            return Err(BlockError::SpeedExceedsSize {
                speed: self.speed,
                size: self.size,
            });
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(BlockError::InvalidDates { start, end });
            }
        }

        Ok(Block {
            id,
            subject_id: self.subject_id,
            order: self.order,
            name,
            speed: self.speed,
            space: self.space,
            lap: self.lap,
            size: self.size,
            is_tail: self.is_tail,
            level: self.level,
            start_date: self.start_date,
            end_date: self.end_date,
            archived: false,
        })
    }
}

/// Ordered chunk of a subject's material with its own pacing.
///
/// `space` is the distribution period in days: a block with `space = 1`
/// releases `speed` items every day, `space = 3` every third day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    subject_id: SubjectId,
    order: u32,
    name: String,
    speed: u32,
    space: u32,
    lap: u32,
    size: u32,
    is_tail: bool,
    level: u32,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    archived: bool,
}

/// The pacing parameters of a block, copied into progression state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockParams {
    pub id: BlockId,
    pub speed: u32,
    pub space: u32,
    pub lap: u32,
    pub size: u32,
    pub is_tail: bool,
}

impl Block {
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn speed(&self) -> u32 {
        self.speed
    }

    #[must_use]
    pub fn space(&self) -> u32 {
        self.space
    }

    #[must_use]
    pub fn lap(&self) -> u32 {
        self.lap
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn is_tail(&self) -> bool {
        self.is_tail
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    #[must_use]
    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived
    }

    #[must_use]
    pub fn params(&self) -> BlockParams {
        BlockParams {
            id: self.id,
            speed: self.speed,
            space: self.space,
            lap: self.lap,
            size: self.size,
            is_tail: self.is_tail,
        }
    }

    /// Number of distribution events needed to hand out every lap.
    #[must_use]
    pub fn distribution_events(&self) -> u32 {
        self.size.div_ceil(self.speed) * self.lap
    }

    /// Calendar days the block occupies when nothing interrupts it.
    #[must_use]
    pub fn planned_days(&self) -> u32 {
        self.distribution_events() * self.space
    }

    /// Items handed out over all laps.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.size * self.lap
    }

    pub(crate) fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    pub(crate) fn set_schedule(&mut self, start: NaiveDate, end: NaiveDate) {
        self.start_date = Some(start);
        self.end_date = Some(end);
    }

    /// Replace the planned dates.
    ///
    /// # Errors
    ///
    /// Returns `BlockError::InvalidDates` if `end` precedes `start`.
    pub fn reschedule(&mut self, start: NaiveDate, end: NaiveDate) -> Result<(), BlockError> {
        if end < start {
            return Err(BlockError::InvalidDates { start, end });
        }
        self.set_schedule(start, end);
        Ok(())
    }

    /// Soft-delete; archived blocks drop out of every [`BlockSequence`].
    pub fn archive(&mut self) {
        self.archived = true;
    }

    /// Rebuild a block from storage, keeping the archived flag.
    ///
    /// # Errors
    ///
    /// Returns `BlockError` under the same rules as [`BlockDraft::validate`].
    pub fn from_persisted(id: BlockId, draft: BlockDraft, archived: bool) -> Result<Self, BlockError> {
        let mut block = draft.validate(id)?;
        block.archived = archived;
        Ok(block)
    }
}

//
// ─── SEQUENCE ──────────────────────────────────────────────────────────────────
//

/// Read-only, validated view of one subject's live blocks in `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSequence {
    subject_id: SubjectId,
    blocks: Vec<Block>,
}

impl BlockSequence {
    /// Build the sequence, dropping archived blocks.
    ///
    /// # Errors
    ///
    /// - `Missing(NoBlocks)` when no live block remains
    /// - `Foreign` when a block belongs to another subject
    /// - `OrderGap` when orders are not exactly `1..=n`
    /// - `TailMismatch` when any block but the last carries the tail flag, or the last lacks it
    pub fn new(subject_id: SubjectId, blocks: Vec<Block>) -> Result<Self, SequenceError> {
        let mut blocks: Vec<Block> = blocks.into_iter().filter(|b| !b.archived).collect();
        if blocks.is_empty() {
            return Err(MissingReferenceData::NoBlocks(subject_id).into());
        }
        blocks.sort_by_key(Block::order);

        let last = blocks.len() - 1;
        for (idx, block) in blocks.iter().enumerate() {
            if block.subject_id != subject_id {
                return Err(InvalidStateTransition::ForeignBlock {
                    block_id: block.id,
                    subject_id,
                }
                .into());
            }
            let expected = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            if block.order != expected {
                return Err(SequenceError::OrderGap {
                    expected,
                    found: block.order,
                });
            }
            if block.is_tail != (idx == last) {
                return Err(SequenceError::TailMismatch(block.id));
            }
        }

        Ok(Self { subject_id, blocks })
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn first(&self) -> &Block {
        &self.blocks[0]
    }

    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Like [`get`](Self::get) but a missing block is an error.
    ///
    /// # Errors
    ///
    /// Returns `MissingReferenceData::Block` if the id is not in this sequence.
    pub fn require(&self, id: BlockId) -> Result<&Block, MissingReferenceData> {
        self.get(id).ok_or(MissingReferenceData::Block(id))
    }

    #[must_use]
    pub fn position(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// The block that follows `id`, if any.
    #[must_use]
    pub fn next_after(&self, id: BlockId) -> Option<&Block> {
        self.position(id).and_then(|idx| self.blocks.get(idx + 1))
    }

    /// Blocks strictly after `id`.
    #[must_use]
    pub fn after(&self, id: BlockId) -> &[Block] {
        match self.position(id) {
            Some(idx) => &self.blocks[idx + 1..],
            None => &[],
        }
    }

    /// Items handed out across every block and lap of the subject.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.blocks.iter().map(Block::total_items).sum()
    }

    /// One unsaved item per position of every block, numbered in sequence order.
    #[must_use]
    pub fn provision_items(&self) -> Vec<NewItem> {
        let mut overall = 0;
        let mut out = Vec::with_capacity(self.blocks.iter().map(|b| b.size as usize).sum());
        for block in &self.blocks {
            for in_block_order in 1..=block.size {
                overall += 1;
                out.push(NewItem {
                    subject_id: self.subject_id,
                    block_id: block.id,
                    in_block_order,
                    overall_order: overall,
                });
            }
        }
        out
    }

    #[must_use]
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn draft(subject: u64, order: u32, speed: u32, space: u32, lap: u32, size: u32) -> BlockDraft {
        BlockDraft {
            subject_id: SubjectId::new(subject),
            order,
            name: format!("Block {order}"),
            speed,
            space,
            lap,
            size,
            is_tail: false,
            level: 1,
            start_date: None,
            end_date: None,
        }
    }

    /// Builds a valid sequence from `(speed, space, lap, size)` tuples; block ids are `subject * 100 + order`.
    pub(crate) fn sequence(subject: u64, specs: &[(u32, u32, u32, u32)]) -> BlockSequence {
        let last = specs.len();
        let blocks = specs
            .iter()
            .enumerate()
            .map(|(idx, &(speed, space, lap, size))| {
                let order = u32::try_from(idx + 1).unwrap();
                let mut d = draft(subject, order, speed, space, lap, size);
                d.is_tail = idx + 1 == last;
                d.validate(BlockId::new(subject * 100 + u64::from(order))).unwrap()
            })
            .collect();
        BlockSequence::new(SubjectId::new(subject), blocks).unwrap()
    }

    #[test]
    fn draft_rejects_zero_pacing() {
        let mut d = draft(1, 1, 0, 1, 1, 4);
        assert_eq!(d.clone().validate(BlockId::new(1)).unwrap_err(), BlockError::InvalidSpeed);
        d.speed = 1;
        d.space = 0;
        assert_eq!(d.clone().validate(BlockId::new(1)).unwrap_err(), BlockError::InvalidSpace);
        d.space = 1;
        d.lap = 0;
        assert_eq!(d.clone().validate(BlockId::new(1)).unwrap_err(), BlockError::InvalidLap);
        d.lap = 1;
        d.size = 0;
        assert_eq!(d.clone().validate(BlockId::new(1)).unwrap_err(), BlockError::InvalidSize);
        d.speed = 5;
        d.size = 4;
        assert_eq!(
            d.validate(BlockId::new(1)).unwrap_err(),
            BlockError::SpeedExceedsSize { speed: 5, size: 4 }
        );
    }

    #[test]
    fn draft_rejects_blank_name_and_reversed_dates() {
        let mut d = draft(1, 1, 1, 1, 1, 1);
        d.name = "  ".into();
        assert_eq!(d.clone().validate(BlockId::new(1)).unwrap_err(), BlockError::EmptyName);

        d.name = "ok".into();
        let start = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        d.start_date = Some(start);
        d.end_date = Some(end);
        assert_eq!(
            d.validate(BlockId::new(1)).unwrap_err(),
            BlockError::InvalidDates { start, end }
        );
    }

    #[test]
    fn planned_days_counts_every_lap() {
        let block = draft(1, 1, 3, 2, 2, 7).validate(BlockId::new(1)).unwrap();
        // ceil(7 / 3) = 3 events per lap, 2 laps, every 2 days
        assert_eq!(block.distribution_events(), 6);
        assert_eq!(block.planned_days(), 12);
        assert_eq!(block.total_items(), 14);
    }

    #[test]
    fn sequence_orders_and_links_blocks() {
        let seq = sequence(1, &[(1, 1, 1, 2), (2, 1, 1, 4), (1, 1, 2, 3)]);
        assert_eq!(seq.first().id(), BlockId::new(101));
        assert_eq!(seq.next_after(BlockId::new(101)).unwrap().id(), BlockId::new(102));
        assert!(seq.next_after(BlockId::new(103)).is_none());
        assert_eq!(seq.after(BlockId::new(101)).len(), 2);
        assert_eq!(seq.total_items(), 2 + 4 + 6);
    }

    #[test]
    fn sequence_rejects_empty_gap_and_tail_mismatch() {
        let err = BlockSequence::new(SubjectId::new(1), Vec::new()).unwrap_err();
        assert_eq!(err, SequenceError::Missing(MissingReferenceData::NoBlocks(SubjectId::new(1))));

        let mut only = draft(1, 2, 1, 1, 1, 1);
        only.is_tail = true;
        let err = BlockSequence::new(SubjectId::new(1), vec![only.validate(BlockId::new(1)).unwrap()])
            .unwrap_err();
        assert_eq!(err, SequenceError::OrderGap { expected: 1, found: 2 });

        let untailed = draft(1, 1, 1, 1, 1, 1).validate(BlockId::new(1)).unwrap();
        let err = BlockSequence::new(SubjectId::new(1), vec![untailed]).unwrap_err();
        assert_eq!(err, SequenceError::TailMismatch(BlockId::new(1)));
    }

    #[test]
    fn sequence_rejects_foreign_blocks_and_skips_archived() {
        let mut foreign = draft(2, 1, 1, 1, 1, 1);
        foreign.is_tail = true;
        let err = BlockSequence::new(SubjectId::new(1), vec![foreign.validate(BlockId::new(9)).unwrap()])
            .unwrap_err();
        assert!(matches!(err, SequenceError::Foreign(_)));

        let mut tail = draft(1, 1, 1, 1, 1, 1);
        tail.is_tail = true;
        let mut archived = tail.clone().validate(BlockId::new(2)).unwrap();
        archived.archive();
        let seq = BlockSequence::new(
            SubjectId::new(1),
            vec![archived, tail.validate(BlockId::new(1)).unwrap()],
        )
        .unwrap();
        assert_eq!(seq.blocks().len(), 1);
    }

    #[test]
    fn provision_items_numbers_across_blocks() {
        let seq = sequence(1, &[(1, 1, 1, 2), (1, 1, 1, 3)]);
        let items = seq.provision_items();
        assert_eq!(items.len(), 5);
        assert_eq!(items[2].block_id, BlockId::new(102));
        assert_eq!(items[2].in_block_order, 1);
        assert_eq!(items[4].overall_order, 5);
    }
}
