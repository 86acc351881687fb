use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::{StudentId, SubjectId};

/// Minutes of work each subject costs on one day.
pub type DailyCost = BTreeMap<SubjectId, u32>;

/// A distinct daily workload vector and how many simulated days produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTimePattern {
    /// 1-based, in order of first appearance.
    pub order: u32,
    pub per_subject_minutes: DailyCost,
    pub occurrence_count: u32,
}

impl StudyTimePattern {
    #[must_use]
    pub fn total_minutes(&self) -> u32 {
        self.per_subject_minutes.values().sum()
    }
}

/// Planning report for one student. Rebuilt from scratch on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub student_id: StudentId,
    pub start_date: NaiveDate,
    pub patterns: Vec<StudyTimePattern>,
    pub total_days: u32,
}

impl ForecastReport {
    /// Last simulated day, i.e. the day every subject finished.
    #[must_use]
    pub fn finish_date(&self) -> NaiveDate {
        self.start_date
            .checked_add_days(chrono::Days::new(u64::from(self.total_days.saturating_sub(1))))
            .unwrap_or(self.start_date)
    }
}
