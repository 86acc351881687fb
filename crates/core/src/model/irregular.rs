use serde::{Deserialize, Serialize};

use crate::model::ids::{BlockId, IrregularId, SubjectId};

/// One ad hoc item to splice in right after item `target_insert_number`
/// of block `insert_into_block_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrregularInsertion {
    pub id: IrregularId,
    pub subject_id: SubjectId,
    pub target_insert_number: u32,
    pub insert_into_block_id: BlockId,
    /// Block the item was taken from, when it came from another block.
    pub former_block_id: Option<BlockId>,
    /// Archive the originating entry instead of leaving it live.
    pub is_modified: bool,
}

/// What a merge soft-deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveTarget {
    Block(BlockId),
    Insertion(IrregularId),
}
