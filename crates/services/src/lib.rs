#![forbid(unsafe_code)]

pub mod answer_service;
pub mod engine_services;
pub mod error;
pub mod forecast_service;
mod loading;
pub mod locks;
pub mod merge_service;
pub mod schedule_service;
pub mod sync;
pub mod tracker_service;

pub use pacer_core::Clock;

pub use answer_service::AnswerService;
pub use engine_services::EngineServices;
pub use error::{
    AnswerServiceError, EngineServicesError, ForecastServiceError, LoadError, MergeServiceError,
    ScheduleServiceError, SyncError, TrackerServiceError,
};
pub use forecast_service::ForecastService;
pub use merge_service::{MergeOutcome, MergeService};
pub use schedule_service::ScheduleService;
pub use sync::{EntityChange, EntityRef, NoopSync, PresentationSync, RecordingSync};
pub use tracker_service::TrackerService;
