use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use pacer_core::Clock;
use pacer_core::forecast::{ForecastError, StudentPlan, SubjectPlan, forecast, forecast_students};
use pacer_core::model::{Block, BlockId, EngineSettings, ForecastReport, StudentId};
use storage::repository::{
    AverageTimeRepository, BlockRepository, ForecastRepository, RestRepository, StorageError,
    TrackerRepository,
};

use crate::error::ForecastServiceError;
use crate::loading::{load_rests, load_sequence};

/// Runs the planning forecast and keeps the last successful report per student.
#[derive(Clone)]
pub struct ForecastService {
    clock: Clock,
    settings: EngineSettings,
    blocks: Arc<dyn BlockRepository>,
    trackers: Arc<dyn TrackerRepository>,
    rests: Arc<dyn RestRepository>,
    average_times: Arc<dyn AverageTimeRepository>,
    forecasts: Arc<dyn ForecastRepository>,
}

impl ForecastService {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: EngineSettings,
        blocks: Arc<dyn BlockRepository>,
        trackers: Arc<dyn TrackerRepository>,
        rests: Arc<dyn RestRepository>,
        average_times: Arc<dyn AverageTimeRepository>,
        forecasts: Arc<dyn ForecastRepository>,
    ) -> Self {
        Self {
            clock,
            settings,
            blocks,
            trackers,
            rests,
            average_times,
            forecasts,
        }
    }

    /// Forecast one student from their live trackers, starting today.
    ///
    /// The stored report is replaced only when the run succeeds; on failure
    /// the previous report stays visible through [`Self::latest`].
    ///
    /// # Errors
    ///
    /// Returns `ForecastServiceError` if loading, simulating or storing fails.
    pub async fn refresh(&self, student_id: StudentId) -> Result<ForecastReport, ForecastServiceError> {
        let plan = self.load_plan(student_id, self.clock.today()).await?;
        let times = self.times_for(std::slice::from_ref(&plan)).await?;
        let result = forecast(&plan, &times, &self.settings);
        self.keep(student_id, result).await
    }

    /// Forecast several students; the simulations run in parallel.
    ///
    /// Each student succeeds or fails on their own. Results come back in the
    /// order of `students`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` only if the average-time lookup shared by all
    /// students fails.
    pub async fn refresh_many(
        &self,
        students: &[StudentId],
    ) -> Result<Vec<(StudentId, Result<ForecastReport, ForecastServiceError>)>, ForecastServiceError>
    {
        let start_date = self.clock.today();
        let mut plans = Vec::with_capacity(students.len());
        let mut out = Vec::with_capacity(students.len());
        for &student_id in students {
            match self.load_plan(student_id, start_date).await {
                Ok(plan) => plans.push(plan),
                Err(err) => {
                    log::warn!("forecast for student {student_id} not started: {err}");
                    out.push((student_id, Err(err)));
                }
            }
        }

        let times = self.times_for(&plans).await?;
        for (student_id, result) in forecast_students(&plans, &times, &self.settings) {
            out.push((student_id, self.keep(student_id, result).await));
        }
        out.sort_by_key(|(id, _)| students.iter().position(|s| s == id));
        Ok(out)
    }

    /// Last successful report for the student, if any run has succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the report cannot be read.
    pub async fn latest(&self, student_id: StudentId) -> Result<Option<ForecastReport>, ForecastServiceError> {
        Ok(self.forecasts.latest_forecast(student_id).await?)
    }

    async fn times_for(&self, plans: &[StudentPlan]) -> Result<HashMap<BlockId, u32>, StorageError> {
        let mut block_ids: Vec<BlockId> = plans
            .iter()
            .flat_map(|p| p.subjects.iter())
            .flat_map(|s| s.sequence.blocks().iter().map(Block::id))
            .collect();
        block_ids.sort_unstable();
        block_ids.dedup();
        self.average_times.average_times(&block_ids).await
    }

    /// Store a successful report; a failed run leaves the previous one in place.
    async fn keep(
        &self,
        student_id: StudentId,
        result: Result<ForecastReport, ForecastError>,
    ) -> Result<ForecastReport, ForecastServiceError> {
        match result {
            Ok(report) => {
                self.forecasts.save_forecast(&report).await?;
                Ok(report)
            }
            Err(err) => {
                log::warn!("forecast for student {student_id} failed, keeping previous: {err}");
                Err(err.into())
            }
        }
    }

    async fn load_plan(
        &self,
        student_id: StudentId,
        start_date: NaiveDate,
    ) -> Result<StudentPlan, ForecastServiceError> {
        let trackers = self.trackers.trackers_for_student(student_id).await?;
        let mut subjects = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            let sequence = load_sequence(self.blocks.as_ref(), tracker.subject_id).await?;
            let rests = load_rests(self.rests.as_ref(), student_id, tracker.subject_id).await?;
            subjects.push(SubjectPlan {
                sequence,
                rests,
                tracker: Some(tracker),
            });
        }
        Ok(StudentPlan {
            student_id,
            start_date,
            subjects,
        })
    }
}
