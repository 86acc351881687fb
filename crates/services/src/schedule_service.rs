use std::sync::Arc;

use chrono::NaiveDate;
use pacer_core::error::ConcurrentMutationConflict;
use pacer_core::model::{BlockSequence, StudentId, SubjectId};
use pacer_core::schedule::{BlockSchedule, adjust_schedule, plan_schedule};
use storage::repository::{
    BlockDateUpdate, BlockRepository, RestRepository, StorageError, TrackerRepository,
};

use crate::error::ScheduleServiceError;
use crate::loading::{load_rests, load_sequence};
use crate::locks::EngineLocks;
use crate::sync::{EntityChange, EntityRef, PresentationSync, push_nonempty};
use crate::tracker_service::fetch_tracker;

/// Dates a subject's blocks and re-paces them when a student drifts.
#[derive(Clone)]
pub struct ScheduleService {
    blocks: Arc<dyn BlockRepository>,
    trackers: Arc<dyn TrackerRepository>,
    rests: Arc<dyn RestRepository>,
    sync: Arc<dyn PresentationSync>,
    locks: Arc<EngineLocks>,
}

impl ScheduleService {
    #[must_use]
    pub fn new(
        blocks: Arc<dyn BlockRepository>,
        trackers: Arc<dyn TrackerRepository>,
        rests: Arc<dyn RestRepository>,
        sync: Arc<dyn PresentationSync>,
        locks: Arc<EngineLocks>,
    ) -> Self {
        Self {
            blocks,
            trackers,
            rests,
            sync,
            locks,
        }
    }

    /// Lay out every block of the subject back to back from `start`.
    ///
    /// # Errors
    ///
    /// - `Load` if the blocks or rests cannot be read
    /// - `Conflict` if the blocks were re-dated by another writer meanwhile
    /// - `Storage` if the dates cannot be written
    pub async fn plan(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
        start: NaiveDate,
    ) -> Result<Vec<BlockSchedule>, ScheduleServiceError> {
        let _guard = self.locks.acquire_subject(subject_id).await;

        let sequence = load_sequence(self.blocks.as_ref(), subject_id).await?;
        let rests = load_rests(self.rests.as_ref(), student_id, subject_id).await?;
        let schedule = plan_schedule(&sequence, start, &rests);
        self.store(&sequence, &schedule).await?;
        Ok(schedule)
    }

    /// Shift the student's current block by `shift_days` and re-date every
    /// later block. Positive days delay, negative days expedite.
    ///
    /// All dates are written in one step or not at all.
    ///
    /// # Errors
    ///
    /// - `Load` if the tracker, blocks or rests cannot be read
    /// - `Schedule` if the current block is undated or the shift overflows
    /// - `Conflict` if the blocks were re-dated by another writer meanwhile
    /// - `Storage` if the dates cannot be written
    /// - `Sync` if the change records could not be pushed (dates are already stored)
    pub async fn shift(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
        shift_days: i64,
    ) -> Result<Vec<BlockSchedule>, ScheduleServiceError> {
        let _guard = self.locks.acquire_subject(subject_id).await;

        let tracker = fetch_tracker(self.trackers.as_ref(), student_id, subject_id).await?;
        let sequence = load_sequence(self.blocks.as_ref(), subject_id).await?;
        let rests = load_rests(self.rests.as_ref(), student_id, subject_id).await?;

        let schedule = adjust_schedule(&sequence, tracker.current_block_id, shift_days, &rests)?;
        self.store(&sequence, &schedule).await?;
        Ok(schedule)
    }

    /// Write `schedule` only over the dates `read` still carries.
    async fn store_against(
        &self,
        read: &BlockSequence,
        schedule: &[BlockSchedule],
    ) -> Result<(), ScheduleServiceError> {
        let updates = BlockDateUpdate::against(read, schedule)?;
        match self.blocks.update_block_dates(&updates).await {
            Ok(()) => Ok(()),
            Err(StorageError::Conflict) => {
                let conflict = ConcurrentMutationConflict {
                    entity: "block dates",
                    key: format!("subject {}", read.subject_id()),
                    expected_version: None,
                };
                log::warn!("{conflict}");
                Err(conflict.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn store(
        &self,
        read: &BlockSequence,
        schedule: &[BlockSchedule],
    ) -> Result<(), ScheduleServiceError> {
        self.store_against(read, schedule).await?;

        let changes = schedule
            .iter()
            .map(|s| {
                EntityChange::new(EntityRef::Block {
                    block_id: s.block_id,
                })
                .with("start_date", s.start_date.to_string())
                .with("end_date", s.end_date.to_string())
            })
            .collect();
        push_nonempty(self.sync.as_ref(), changes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::NoopSync;
    use chrono::Days;
    use pacer_core::model::{Block, BlockDraft, BlockId, RestCalendar};
    use pacer_core::time::fixed_today;
    use storage::repository::Storage;

    fn block(order: u32, is_tail: bool) -> Block {
        BlockDraft {
            subject_id: SubjectId::new(1),
            order,
            name: format!("Block {order}"),
            speed: 1,
            space: 1,
            lap: 1,
            size: 2,
            is_tail,
            level: 1,
            start_date: None,
            end_date: None,
        }
        .validate(BlockId::new(u64::from(order)))
        .unwrap()
    }

    #[tokio::test]
    async fn dates_planned_from_a_stale_read_are_not_written() {
        let storage = Storage::in_memory();
        for b in [block(1, false), block(2, true)] {
            storage.blocks.upsert_block(&b).await.unwrap();
        }
        let service = ScheduleService::new(
            Arc::clone(&storage.blocks),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.rests),
            Arc::new(NoopSync),
            Arc::new(EngineLocks::new()),
        );
        let stale = load_sequence(storage.blocks.as_ref(), SubjectId::new(1)).await.unwrap();

        let planned = service
            .plan(StudentId::new(1), SubjectId::new(1), fixed_today())
            .await
            .unwrap();

        // a writer that read the blocks before the plan above landed
        let later = fixed_today().checked_add_days(Days::new(7)).unwrap();
        let replanned = plan_schedule(&stale, later, &RestCalendar::empty());
        let err = service.store_against(&stale, &replanned).await.unwrap_err();
        assert!(matches!(
            err,
            ScheduleServiceError::Conflict(ConcurrentMutationConflict {
                entity: "block dates",
                expected_version: None,
                ..
            })
        ));

        let blocks = storage.blocks.blocks_for_subject(SubjectId::new(1)).await.unwrap();
        assert_eq!(blocks[0].start_date(), Some(planned[0].start_date));
        assert_eq!(blocks[1].end_date(), Some(planned[1].end_date));
    }
}
