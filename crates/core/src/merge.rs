//! Splicing irregular insertions into a subject's block plan.
//!
//! Every insertion names an existing item by its pre-merge position; the new
//! item goes right after it. All insertions of a subject are resolved before
//! anything is renumbered, so one bad target rejects the whole merge.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{InvalidStateTransition, MissingReferenceData};
use crate::model::{
    ArchiveTarget, Block, BlockId, BlockSequence, IrregularId, IrregularInsertion, Item, ItemId,
    NewItem,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MergeError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),

    #[error(transparent)]
    Invalid(#[from] InvalidStateTransition),
}

/// New numbering for an existing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renumbering {
    pub item_id: ItemId,
    pub in_block_order: u32,
    pub overall_order: u32,
}

/// Everything a merge changes, to be written in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergePlan {
    /// Blocks whose size grew.
    pub blocks: Vec<Block>,
    pub renumbered: Vec<Renumbering>,
    pub new_items: Vec<NewItem>,
    pub archived: Vec<ArchiveTarget>,
    pub merged: Vec<IrregularId>,
    /// Extra hand-outs the new items add over all laps.
    pub added_workload: u32,
}

impl MergePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}

/// A resolved insertion: the target item's pre-merge numbering.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    insertion: IrregularId,
    block_id: BlockId,
    in_block: u32,
    overall: u32,
}

/// Merge `insertions` into `sequence`.
///
/// `items` are the subject's current items. `delivered` is the highest
/// `overall_order` already handed out, if any; an insertion that would
/// renumber such an item is rejected.
///
/// # Errors
///
/// - `Missing(Block)` if an insertion targets a block outside the sequence
/// - `Missing(InsertionTarget)` if the target item does not exist
/// - `Invalid(ForeignBlock)` if an insertion belongs to another subject
/// - `Invalid(DeliveredItem)` if an insertion lands before the delivered frontier
pub fn merge_insertions(
    sequence: &BlockSequence,
    items: &[Item],
    insertions: &[IrregularInsertion],
    delivered: Option<u32>,
) -> Result<MergePlan, MergeError> {
    match plan(sequence, items, insertions, delivered) {
        Ok(plan) => {
            if !plan.is_empty() {
                info!(
                    "subject {}: merged {} insertions, renumbered {} items",
                    sequence.subject_id(),
                    plan.merged.len(),
                    plan.renumbered.len()
                );
            }
            Ok(plan)
        }
        Err(err) => {
            warn!("subject {}: merge rejected: {err}", sequence.subject_id());
            Err(err)
        }
    }
}

fn plan(
    sequence: &BlockSequence,
    items: &[Item],
    insertions: &[IrregularInsertion],
    delivered: Option<u32>,
) -> Result<MergePlan, MergeError> {
    let subject_id = sequence.subject_id();
    let by_position: HashMap<(BlockId, u32), &Item> = items
        .iter()
        .filter(|i| sequence.get(i.block_id).is_some())
        .map(|i| ((i.block_id, i.in_block_order), i))
        .collect();

    let mut anchors = Vec::with_capacity(insertions.len());
    for ins in insertions {
        if ins.subject_id != subject_id {
            return Err(InvalidStateTransition::ForeignBlock {
                block_id: ins.insert_into_block_id,
                subject_id,
            }
            .into());
        }
        sequence.require(ins.insert_into_block_id)?;
        let target = by_position
            .get(&(ins.insert_into_block_id, ins.target_insert_number))
            .ok_or(MissingReferenceData::InsertionTarget {
                insertion: ins.id,
                block_id: ins.insert_into_block_id,
                in_block_order: ins.target_insert_number,
            })?;
        if let Some(frontier) = delivered {
            if target.overall_order < frontier {
                return Err(InvalidStateTransition::DeliveredItem {
                    insertion: ins.id,
                    overall_order: target.overall_order + 1,
                }
                .into());
            }
        }
        anchors.push(Anchor {
            insertion: ins.id,
            block_id: ins.insert_into_block_id,
            in_block: target.in_block_order,
            overall: target.overall_order,
        });
    }
    // Same-target insertions keep their id order.
    anchors.sort_by_key(|a| (a.overall, a.insertion));

    let mut out = MergePlan::default();

    for item in items.iter().filter(|i| sequence.get(i.block_id).is_some()) {
        let in_block_shift = count(anchors.iter().filter(|a| a.block_id == item.block_id && a.in_block < item.in_block_order));
        let overall_shift = count(anchors.iter().filter(|a| a.overall < item.overall_order));
        if in_block_shift > 0 || overall_shift > 0 {
            out.renumbered.push(Renumbering {
                item_id: item.id,
                in_block_order: item.in_block_order + in_block_shift,
                overall_order: item.overall_order + overall_shift,
            });
        }
    }
    out.renumbered.sort_by_key(|r| r.overall_order);

    let mut grown: BTreeMap<BlockId, u32> = BTreeMap::new();
    for (rank, anchor) in anchors.iter().enumerate() {
        // Earlier anchors in the same block (and all earlier anchors overall)
        // have already pushed this target down.
        let before_in_block = count(anchors[..rank].iter().filter(|a| a.block_id == anchor.block_id));
        let before_overall = u32::try_from(rank).unwrap_or(u32::MAX);
        out.new_items.push(NewItem {
            subject_id,
            block_id: anchor.block_id,
            in_block_order: anchor.in_block + before_in_block + 1,
            overall_order: anchor.overall + before_overall + 1,
        });
        *grown.entry(anchor.block_id).or_default() += 1;
    }

    for (block_id, added) in grown {
        let block = sequence.require(block_id)?;
        let mut resized = block.clone();
        resized.set_size(block.size() + added);
        out.added_workload += added * block.lap();
        out.blocks.push(resized);
    }

    for ins in insertions {
        if ins.is_modified {
            out.archived.push(match ins.former_block_id {
                Some(block_id) => ArchiveTarget::Block(block_id),
                None => ArchiveTarget::Insertion(ins.id),
            });
        }
        out.merged.push(ins.id);
    }
    out.archived.dedup();

    Ok(out)
}

fn count<'a>(it: impl Iterator<Item = &'a Anchor>) -> u32 {
    u32::try_from(it.count()).unwrap_or(u32::MAX)
}
