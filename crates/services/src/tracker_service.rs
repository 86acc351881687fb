use std::sync::Arc;

use pacer_core::Clock;
use pacer_core::error::{ConcurrentMutationConflict, MissingReferenceData};
use pacer_core::live::{TrackerAdvance, advance_tracker};
use pacer_core::model::{StudentId, SubjectId, Tracker};
use storage::repository::{
    BlockRepository, ItemRepository, RestRepository, StorageError, TrackerRepository,
};

use crate::error::{AnswerServiceError, LoadError, MergeServiceError, TrackerServiceError};
use crate::loading::{load_rests, load_sequence};
use crate::locks::EngineLocks;
use crate::sync::{EntityChange, EntityRef, PresentationSync, push_nonempty};

/// Enrollment and live advancement of per-subject trackers.
#[derive(Clone)]
pub struct TrackerService {
    clock: Clock,
    blocks: Arc<dyn BlockRepository>,
    items: Arc<dyn ItemRepository>,
    trackers: Arc<dyn TrackerRepository>,
    rests: Arc<dyn RestRepository>,
    sync: Arc<dyn PresentationSync>,
    locks: Arc<EngineLocks>,
}

impl TrackerService {
    #[must_use]
    pub fn new(
        clock: Clock,
        blocks: Arc<dyn BlockRepository>,
        items: Arc<dyn ItemRepository>,
        trackers: Arc<dyn TrackerRepository>,
        rests: Arc<dyn RestRepository>,
        sync: Arc<dyn PresentationSync>,
        locks: Arc<EngineLocks>,
    ) -> Self {
        Self {
            clock,
            blocks,
            items,
            trackers,
            rests,
            sync,
            locks,
        }
    }

    /// Create the tracker for a new enrollment at the first item of the subject.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyEnrolled` if the pair already has a tracker, or
    /// `Load`/`Storage` if the subject's blocks cannot be read.
    pub async fn enroll(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Tracker, TrackerServiceError> {
        let sequence = load_sequence(self.blocks.as_ref(), subject_id).await?;
        let tracker = Tracker::enroll(student_id, &sequence);
        match self.trackers.insert_tracker(&tracker).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => {
                return Err(TrackerServiceError::AlreadyEnrolled {
                    student_id,
                    subject_id,
                });
            }
            Err(err) => return Err(err.into()),
        }
        log::info!("enrolled student {student_id} in subject {subject_id}");
        Ok(tracker)
    }

    /// Current tracker of the pair.
    ///
    /// # Errors
    ///
    /// Returns `Missing(Tracker)` if the student is not enrolled.
    pub async fn tracker(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Tracker, TrackerServiceError> {
        Ok(fetch_tracker(self.trackers.as_ref(), student_id, subject_id).await?)
    }

    /// Record that the student completed the current item and step the tracker.
    ///
    /// Advances for one (student, subject) are serialized; the write is
    /// conditional on the version that was read. On any error the stored
    /// tracker is unchanged.
    ///
    /// # Errors
    ///
    /// - `Advance` if the engine rejects the tracker state
    /// - `Conflict` if the tracker changed underneath this call
    /// - `Sync` if the change records could not be pushed (state is already stored)
    pub async fn complete_current(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<TrackerAdvance, TrackerServiceError> {
        let _guard = self.locks.acquire(student_id, subject_id).await;
        let today = self.clock.today();

        let mut tracker = fetch_tracker(self.trackers.as_ref(), student_id, subject_id).await?;
        let sequence = load_sequence(self.blocks.as_ref(), subject_id).await?;
        let rests = load_rests(self.rests.as_ref(), student_id, subject_id).await?;
        let items = self.items.items_for_subject(subject_id).await?;

        tracker.is_resting = rests.is_rest_day(today);
        let mut advance = advance_tracker(&tracker, &sequence, items.as_slice(), today)?;
        advance.tracker = store_tracker(self.trackers.as_ref(), &advance.tracker).await?;

        log::debug!(
            "student {student_id} subject {subject_id}: {:?}, next item {:?}",
            advance.transition,
            advance.next_item_id
        );
        if advance.subject_complete && !tracker.finished {
            log::info!("student {student_id} finished subject {subject_id}");
        }

        push_nonempty(self.sync.as_ref(), vec![tracker_change(&advance)]).await?;
        Ok(advance)
    }

    /// Pause or resume live advancement for the pair.
    ///
    /// # Errors
    ///
    /// Returns `Missing(Tracker)` if the student is not enrolled or
    /// `Conflict` on a concurrent write.
    pub async fn set_enabled(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
        enabled: bool,
    ) -> Result<Tracker, TrackerServiceError> {
        let _guard = self.locks.acquire(student_id, subject_id).await;
        let mut tracker = fetch_tracker(self.trackers.as_ref(), student_id, subject_id).await?;
        if tracker.is_enabled == enabled {
            return Ok(tracker);
        }
        tracker.is_enabled = enabled;
        let stored = store_tracker(self.trackers.as_ref(), &tracker).await?;

        let change = EntityChange::new(EntityRef::Tracker {
            student_id,
            subject_id,
        })
        .with("is_enabled", enabled);
        push_nonempty(self.sync.as_ref(), vec![change]).await?;
        Ok(stored)
    }
}

pub(crate) async fn fetch_tracker(
    trackers: &dyn TrackerRepository,
    student_id: StudentId,
    subject_id: SubjectId,
) -> Result<Tracker, LoadError> {
    match trackers.get_tracker(student_id, subject_id).await {
        Ok(tracker) => Ok(tracker),
        Err(StorageError::NotFound) => Err(MissingReferenceData::Tracker {
            student_id,
            subject_id,
        }
        .into()),
        Err(err) => Err(err.into()),
    }
}

/// Version-checked write; a lost race becomes `ConcurrentMutationConflict`.
pub(crate) async fn store_tracker(
    trackers: &dyn TrackerRepository,
    tracker: &Tracker,
) -> Result<Tracker, TrackerWriteError> {
    match trackers.update_tracker(tracker).await {
        Ok(stored) => Ok(stored),
        Err(StorageError::Conflict) => {
            let conflict = ConcurrentMutationConflict {
                entity: "tracker",
                key: format!("{}/{}", tracker.student_id, tracker.subject_id),
                expected_version: Some(tracker.version),
            };
            log::warn!("{conflict}");
            Err(TrackerWriteError::Conflict(conflict))
        }
        Err(StorageError::NotFound) => Err(TrackerWriteError::Missing(
            MissingReferenceData::Tracker {
                student_id: tracker.student_id,
                subject_id: tracker.subject_id,
            },
        )),
        Err(err) => Err(TrackerWriteError::Storage(err)),
    }
}

/// Tracker write failures, folded into each service's own error.
#[derive(Debug)]
pub(crate) enum TrackerWriteError {
    Missing(MissingReferenceData),
    Conflict(ConcurrentMutationConflict),
    Storage(StorageError),
}

impl From<TrackerWriteError> for TrackerServiceError {
    fn from(err: TrackerWriteError) -> Self {
        match err {
            TrackerWriteError::Missing(e) => Self::Missing(e),
            TrackerWriteError::Conflict(e) => Self::Conflict(e),
            TrackerWriteError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<TrackerWriteError> for AnswerServiceError {
    fn from(err: TrackerWriteError) -> Self {
        match err {
            TrackerWriteError::Missing(e) => Self::Missing(e),
            TrackerWriteError::Conflict(e) => Self::Conflict(e),
            TrackerWriteError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<TrackerWriteError> for MergeServiceError {
    fn from(err: TrackerWriteError) -> Self {
        match err {
            TrackerWriteError::Missing(e) => Self::Missing(e),
            TrackerWriteError::Conflict(e) => Self::Conflict(e),
            TrackerWriteError::Storage(e) => Self::Storage(e),
        }
    }
}

fn tracker_change(advance: &TrackerAdvance) -> EntityChange {
    let t = &advance.tracker;
    EntityChange::new(EntityRef::Tracker {
        student_id: t.student_id,
        subject_id: t.subject_id,
    })
    .with("current_block_id", t.current_block_id.value())
    .with("item_cursor", t.item_cursor)
    .with("current_lap", t.current_lap)
    .with("remaining_space", t.remaining_space)
    .with("remaining_items", advance.remaining_items)
    .with("delay_days", advance.delay_days)
    .with("next_item_id", advance.next_item_id.map(|id| id.value()))
    .with("subject_complete", advance.subject_complete)
}
