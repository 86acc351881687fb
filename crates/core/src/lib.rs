#![forbid(unsafe_code)]

pub mod error;
pub mod forecast;
pub mod live;
pub mod merge;
pub mod model;
pub mod progression;
pub mod review_queue;
pub mod schedule;
pub mod time;

pub use time::Clock;

use thiserror::Error;

/// Any failure from the engines in this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Missing(#[from] error::MissingReferenceData),

    #[error(transparent)]
    Invalid(#[from] error::InvalidStateTransition),

    #[error(transparent)]
    Conflict(#[from] error::ConcurrentMutationConflict),

    #[error(transparent)]
    Block(#[from] model::BlockError),

    #[error(transparent)]
    Sequence(#[from] model::SequenceError),

    #[error(transparent)]
    Forecast(#[from] forecast::ForecastError),

    #[error(transparent)]
    Advance(#[from] live::AdvanceError),

    #[error(transparent)]
    Schedule(#[from] schedule::ScheduleError),

    #[error(transparent)]
    Merge(#[from] merge::MergeError),
}
