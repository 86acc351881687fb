use std::sync::Arc;

use pacer_core::error::ConcurrentMutationConflict;
use pacer_core::merge::{MergePlan, merge_insertions};
use pacer_core::model::{BlockSequence, Item, SubjectId, Tracker};
use storage::repository::{
    BlockRepository, IrregularRepository, ItemRepository, StorageError, TrackerRepository,
};

use crate::error::MergeServiceError;
use crate::loading::load_sequence;
use crate::locks::EngineLocks;
use crate::sync::{EntityChange, EntityRef, PresentationSync, push_nonempty};
use crate::tracker_service::store_tracker;

/// What a merge changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub plan: MergePlan,
    /// The spliced-in items with their new ids.
    pub inserted: Vec<Item>,
}

/// Splices pending irregular insertions into a subject's block plan.
#[derive(Clone)]
pub struct MergeService {
    blocks: Arc<dyn BlockRepository>,
    items: Arc<dyn ItemRepository>,
    trackers: Arc<dyn TrackerRepository>,
    irregulars: Arc<dyn IrregularRepository>,
    sync: Arc<dyn PresentationSync>,
    locks: Arc<EngineLocks>,
}

impl MergeService {
    #[must_use]
    pub fn new(
        blocks: Arc<dyn BlockRepository>,
        items: Arc<dyn ItemRepository>,
        trackers: Arc<dyn TrackerRepository>,
        irregulars: Arc<dyn IrregularRepository>,
        sync: Arc<dyn PresentationSync>,
        locks: Arc<EngineLocks>,
    ) -> Self {
        Self {
            blocks,
            items,
            trackers,
            irregulars,
            sync,
            locks,
        }
    }

    /// Merge every pending insertion of the subject.
    ///
    /// Items any enrolled student has already been handed are never
    /// renumbered. The whole merge is rejected if any insertion cannot be
    /// placed, leaving the plan untouched. Every unfinished tracker's
    /// remaining-item count grows by the added workload.
    ///
    /// # Errors
    ///
    /// - `Merge` if an insertion target is missing or already delivered
    /// - `Load`/`Storage` if the subject cannot be read or written
    /// - `Conflict` if the insertions were merged by another caller, or a
    ///   tracker changed while its counter was updated
    /// - `Sync` if the change records could not be pushed (the merge is already stored)
    pub async fn merge_pending(&self, subject_id: SubjectId) -> Result<MergeOutcome, MergeServiceError> {
        let _guard = self.locks.acquire_subject(subject_id).await;

        let pending = self.irregulars.pending_insertions(subject_id).await?;
        if pending.is_empty() {
            return Ok(MergeOutcome {
                plan: MergePlan::default(),
                inserted: Vec::new(),
            });
        }

        let sequence = load_sequence(self.blocks.as_ref(), subject_id).await?;
        let items = self.items.items_for_subject(subject_id).await?;
        let trackers = self.trackers.trackers_for_subject(subject_id).await?;
        let delivered = trackers
            .iter()
            .filter_map(|t| delivered_frontier(t, &sequence, &items))
            .max();

        let plan = merge_insertions(&sequence, &items, &pending, delivered)?;
        let inserted = match self.irregulars.apply_merge(&plan).await {
            Ok(inserted) => inserted,
            Err(StorageError::Conflict) => {
                let conflict = ConcurrentMutationConflict {
                    entity: "irregular insertions",
                    key: format!("subject {subject_id}"),
                    expected_version: None,
                };
                log::warn!("{conflict}");
                return Err(conflict.into());
            }
            Err(err) => return Err(err.into()),
        };
        log::info!(
            "subject {subject_id}: merged {} insertions, {} new items",
            plan.merged.len(),
            inserted.len()
        );

        if plan.added_workload > 0 {
            for mut tracker in trackers.into_iter().filter(|t| !t.finished) {
                tracker.remaining_items += plan.added_workload;
                let stored = store_tracker(self.trackers.as_ref(), &tracker).await?;
                log::debug!(
                    "student {} subject {subject_id}: {} items remaining after merge",
                    stored.student_id,
                    stored.remaining_items
                );
            }
        }

        push_nonempty(self.sync.as_ref(), merge_changes(&plan, &inserted)).await?;
        Ok(MergeOutcome { plan, inserted })
    }
}

/// Highest `overall_order` the tracker has already handed out.
///
/// The tracker's cursor names the next item to release, so everything
/// before it in the current block (the whole block after the first lap) and
/// every earlier block has been delivered.
fn delivered_frontier(tracker: &Tracker, sequence: &BlockSequence, items: &[Item]) -> Option<u32> {
    let current = sequence.position(tracker.current_block_id)?;
    items
        .iter()
        .filter(|item| {
            if tracker.finished {
                return true;
            }
            match sequence.position(item.block_id) {
                Some(pos) if pos < current => true,
                Some(pos) if pos == current => {
                    tracker.current_lap > 1 || item.in_block_order < tracker.item_cursor
                }
                _ => false,
            }
        })
        .map(|item| item.overall_order)
        .max()
}

fn merge_changes(plan: &MergePlan, inserted: &[Item]) -> Vec<EntityChange> {
    let blocks = plan.blocks.iter().map(|b| {
        EntityChange::new(EntityRef::Block { block_id: b.id() }).with("size", b.size())
    });
    let renumbered = plan.renumbered.iter().map(|r| {
        EntityChange::new(EntityRef::Item { item_id: r.item_id })
            .with("in_block_order", r.in_block_order)
            .with("overall_order", r.overall_order)
    });
    let created = inserted.iter().map(|item| {
        EntityChange::new(EntityRef::Item { item_id: item.id })
            .with("block_id", item.block_id.value())
            .with("in_block_order", item.in_block_order)
            .with("overall_order", item.overall_order)
    });
    let merged = plan.merged.iter().map(|id| {
        EntityChange::new(EntityRef::Insertion { insertion_id: *id }).with("merged", true)
    });
    blocks.chain(renumbered).chain(created).chain(merged).collect()
}
