//! Shared error types for the services crate.

use thiserror::Error;

use pacer_core::error::{ConcurrentMutationConflict, InvalidStateTransition, MissingReferenceData};
use pacer_core::forecast::ForecastError;
use pacer_core::live::AdvanceError;
use pacer_core::merge::MergeError;
use pacer_core::model::SequenceError;
use pacer_core::schedule::ScheduleError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors from the presentation-sync collaborator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("presentation sync rejected {count} changes: {reason}")]
    Rejected { count: usize, reason: String },
    #[error("presentation sync unavailable: {0}")]
    Unavailable(String),
}

/// Failures while loading a subject's blocks and rests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ForecastService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForecastServiceError {
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `TrackerService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerServiceError {
    #[error("student {student_id} is already enrolled in subject {subject_id}")]
    AlreadyEnrolled {
        student_id: pacer_core::model::StudentId,
        subject_id: pacer_core::model::SubjectId,
    },
    #[error(transparent)]
    Advance(#[from] AdvanceError),
    #[error(transparent)]
    Conflict(#[from] ConcurrentMutationConflict),
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted by `ScheduleService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScheduleServiceError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Conflict(#[from] ConcurrentMutationConflict),
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted by `MergeService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeServiceError {
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Conflict(#[from] ConcurrentMutationConflict),
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted by `AnswerService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnswerServiceError {
    #[error(transparent)]
    Invalid(#[from] InvalidStateTransition),
    #[error(transparent)]
    Conflict(#[from] ConcurrentMutationConflict),
    #[error(transparent)]
    Missing(#[from] MissingReferenceData),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted while bootstrapping engine services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
