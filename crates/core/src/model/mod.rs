mod block;
mod ids;
mod irregular;
mod item;
mod pattern;
mod rest;
mod review;
mod settings;
mod subject;
mod tracker;

pub use block::{Block, BlockDraft, BlockError, BlockParams, BlockSequence, SequenceError};
pub use ids::{BlockId, IrregularId, ItemId, ParseIdError, StudentId, SubjectId};
pub use irregular::{ArchiveTarget, IrregularInsertion};
pub use item::{Answer, AnswerStatus, Item, NewItem};
pub use pattern::{DailyCost, ForecastReport, StudyTimePattern};
pub use rest::{RestCalendar, RestPeriod};
pub(crate) use rest::next_day;
pub use review::{ReviewLevel, ReviewState, ReviewTransition};
pub use settings::{EngineSettings, SettingsError};
pub use subject::{Subject, SubjectError, SubjectLabels};
pub use tracker::Tracker;
