use std::sync::Arc;

use pacer_core::Clock;
use pacer_core::error::{ConcurrentMutationConflict, MissingReferenceData};
use pacer_core::model::{Answer, Item, ItemId, ReviewTransition, StudentId, SubjectId};
use pacer_core::review_queue::{ReviewPacer, ReviewSelection, daily_tick};
use storage::repository::{ItemRepository, StorageError, SubjectRepository, TrackerRepository};

use crate::error::AnswerServiceError;
use crate::locks::EngineLocks;
use crate::sync::{EntityChange, EntityRef, PresentationSync, push_nonempty};
use crate::tracker_service::{fetch_tracker, store_tracker};

/// Answer submission and the daily review cycle.
#[derive(Clone)]
pub struct AnswerService {
    clock: Clock,
    subjects: Arc<dyn SubjectRepository>,
    items: Arc<dyn ItemRepository>,
    trackers: Arc<dyn TrackerRepository>,
    sync: Arc<dyn PresentationSync>,
    locks: Arc<EngineLocks>,
}

impl AnswerService {
    #[must_use]
    pub fn new(
        clock: Clock,
        subjects: Arc<dyn SubjectRepository>,
        items: Arc<dyn ItemRepository>,
        trackers: Arc<dyn TrackerRepository>,
        sync: Arc<dyn PresentationSync>,
        locks: Arc<EngineLocks>,
    ) -> Self {
        Self {
            clock,
            subjects,
            items,
            trackers,
            sync,
            locks,
        }
    }

    /// Record an answer on `item_id` and run the review state machine.
    ///
    /// `is_todo` marks answers given as part of the day's assigned workload;
    /// only those promote items out of the first two levels.
    ///
    /// # Errors
    ///
    /// - `Missing` if the item does not exist
    /// - `Conflict` if another answer on the item was stored since it was read
    /// - `Storage` if it cannot be written
    /// - `Sync` if the change could not be pushed (the answer is already stored)
    pub async fn submit(
        &self,
        item_id: ItemId,
        answer: Answer,
        is_todo: bool,
    ) -> Result<ReviewTransition, AnswerServiceError> {
        let mut item = match self.items.get_item(item_id).await {
            Ok(item) => item,
            Err(StorageError::NotFound) => {
                return Err(MissingReferenceData::UnknownItem(item_id).into());
            }
            Err(err) => return Err(err.into()),
        };

        let read_version = item.version;
        let transition = item.record_answer(answer, is_todo, self.clock.today());
        store_items(self.items.as_ref(), std::slice::from_ref(&item), || ConcurrentMutationConflict {
            entity: "item",
            key: item_id.to_string(),
            expected_version: Some(read_version),
        })
        .await?;
        if transition.changed() {
            log::debug!(
                "item {item_id}: {:?} -> {:?}",
                transition.from.level,
                transition.to.level
            );
        }

        push_nonempty(self.sync.as_ref(), vec![answer_change(&item)]).await?;
        Ok(transition)
    }

    /// Run today's review cycle for the student's subject: count every
    /// item's review countdown down by one day, then pick the items to
    /// resurface under the subject's review pacing.
    ///
    /// Call once per day; each call is one day of countdown.
    ///
    /// # Errors
    ///
    /// - `Missing` if the subject does not exist, `Load` if the tracker is missing
    /// - `Conflict` if an item was answered during the tick, or the tracker
    ///   changed while its review cooldown was stored
    /// - `Storage` if items or tracker cannot be written
    pub async fn daily_review(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<ReviewSelection, AnswerServiceError> {
        let _guard = self.locks.acquire(student_id, subject_id).await;
        let today = self.clock.today();

        let subject = match self.subjects.get_subject(subject_id).await {
            Ok(subject) => subject,
            Err(StorageError::NotFound) => {
                return Err(MissingReferenceData::Subject(subject_id).into());
            }
            Err(err) => return Err(err.into()),
        };
        let mut tracker = fetch_tracker(self.trackers.as_ref(), student_id, subject_id).await?;
        let mut items = self.items.items_for_subject(subject_id).await?;

        let before: Vec<Item> = items.clone();
        let became_due = daily_tick(&mut items, today);
        let ticked: Vec<Item> = items
            .iter()
            .zip(&before)
            .filter(|(after, before)| after.review != before.review)
            .map(|(after, _)| after.clone())
            .collect();
        store_items(self.items.as_ref(), &ticked, || ConcurrentMutationConflict {
            entity: "review items",
            key: format!("subject {subject_id}"),
            expected_version: None,
        })
        .await?;

        let selection = ReviewPacer::for_subject(&subject).select(tracker.remaining_review_space, &items);
        if selection.remaining_space != tracker.remaining_review_space {
            tracker.remaining_review_space = selection.remaining_space;
            store_tracker(self.trackers.as_ref(), &tracker).await?;
        }
        log::info!(
            "student {student_id} subject {subject_id}: {} items became due, {} resurfaced",
            became_due.len(),
            selection.items.len()
        );

        let changes = selection
            .items
            .iter()
            .map(|id| {
                EntityChange::new(EntityRef::Item { item_id: *id }).with("review_due", true)
            })
            .collect();
        push_nonempty(self.sync.as_ref(), changes).await?;
        Ok(selection)
    }
}

/// Version-checked item write; a lost race becomes `ConcurrentMutationConflict`.
async fn store_items(
    repo: &dyn ItemRepository,
    items: &[Item],
    conflict: impl FnOnce() -> ConcurrentMutationConflict,
) -> Result<(), AnswerServiceError> {
    match repo.update_items(items).await {
        Ok(()) => Ok(()),
        Err(StorageError::Conflict) => {
            let conflict = conflict();
            log::warn!("{conflict}");
            Err(conflict.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn answer_change(item: &Item) -> EntityChange {
    EntityChange::new(EntityRef::Item { item_id: item.id })
        .with("answer_status", item.answer_status.as_i64())
        .with("try_count", item.try_count)
        .with("wrong_count", item.wrong_count)
        .with("difficult_count", item.difficult_count)
        .with("review_level", item.review.level.as_i64())
        .with("review_countdown_days", item.review.countdown_days)
        .with("last_answered", item.last_answered.map(|d| d.to_string()))
}
