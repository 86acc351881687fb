use std::sync::Arc;

use pacer_core::model::EngineSettings;
use storage::repository::Storage;

use crate::Clock;
use crate::answer_service::AnswerService;
use crate::error::EngineServicesError;
use crate::forecast_service::ForecastService;
use crate::locks::EngineLocks;
use crate::merge_service::MergeService;
use crate::schedule_service::ScheduleService;
use crate::sync::PresentationSync;
use crate::tracker_service::TrackerService;

/// Assembles the engine-facing services over one storage backend.
///
/// Every service that writes trackers, blocks or items shares one lock table.
#[derive(Clone)]
pub struct EngineServices {
    forecasts: Arc<ForecastService>,
    trackers: Arc<TrackerService>,
    schedules: Arc<ScheduleService>,
    merges: Arc<MergeService>,
    answers: Arc<AnswerService>,
}

impl EngineServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `EngineServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: EngineSettings,
        sync: Arc<dyn PresentationSync>,
    ) -> Result<Self, EngineServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, settings, sync))
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        settings: EngineSettings,
        sync: Arc<dyn PresentationSync>,
    ) -> Self {
        let locks = Arc::new(EngineLocks::new());

        let forecasts = Arc::new(ForecastService::new(
            clock,
            settings,
            Arc::clone(&storage.blocks),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.rests),
            Arc::clone(&storage.average_times),
            Arc::clone(&storage.forecasts),
        ));
        let trackers = Arc::new(TrackerService::new(
            clock,
            Arc::clone(&storage.blocks),
            Arc::clone(&storage.items),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.rests),
            Arc::clone(&sync),
            Arc::clone(&locks),
        ));
        let schedules = Arc::new(ScheduleService::new(
            Arc::clone(&storage.blocks),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.rests),
            Arc::clone(&sync),
            Arc::clone(&locks),
        ));
        let merges = Arc::new(MergeService::new(
            Arc::clone(&storage.blocks),
            Arc::clone(&storage.items),
            Arc::clone(&storage.trackers),
            Arc::clone(&storage.irregulars),
            Arc::clone(&sync),
            Arc::clone(&locks),
        ));
        let answers = Arc::new(AnswerService::new(
            clock,
            Arc::clone(&storage.subjects),
            Arc::clone(&storage.items),
            Arc::clone(&storage.trackers),
            sync,
            locks,
        ));

        Self {
            forecasts,
            trackers,
            schedules,
            merges,
            answers,
        }
    }

    #[must_use]
    pub fn forecasts(&self) -> Arc<ForecastService> {
        Arc::clone(&self.forecasts)
    }

    #[must_use]
    pub fn trackers(&self) -> Arc<TrackerService> {
        Arc::clone(&self.trackers)
    }

    #[must_use]
    pub fn schedules(&self) -> Arc<ScheduleService> {
        Arc::clone(&self.schedules)
    }

    #[must_use]
    pub fn merges(&self) -> Arc<MergeService> {
        Arc::clone(&self.merges)
    }

    #[must_use]
    pub fn answers(&self) -> Arc<AnswerService> {
        Arc::clone(&self.answers)
    }
}
