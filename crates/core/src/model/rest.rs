use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::MissingReferenceData;
use crate::model::ids::{StudentId, SubjectId};

/// Inclusive blackout range pausing distribution for one (student, subject).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestPeriod {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RestPeriod {
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Every rest period of one (student, subject), validated and sorted by start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestCalendar {
    periods: Vec<RestPeriod>,
}

impl RestCalendar {
    /// # Errors
    ///
    /// Returns `MissingReferenceData::MalformedRest` for a period whose end precedes its start.
    pub fn new(mut periods: Vec<RestPeriod>) -> Result<Self, MissingReferenceData> {
        if let Some(bad) = periods.iter().find(|p| p.end < p.start) {
            return Err(MissingReferenceData::MalformedRest {
                start: bad.start,
                end: bad.end,
            });
        }
        periods.sort_by_key(|p| (p.start, p.end));
        Ok(Self { periods })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn periods(&self) -> &[RestPeriod] {
        &self.periods
    }

    #[must_use]
    pub fn is_rest_day(&self, date: NaiveDate) -> bool {
        self.periods.iter().any(|p| p.contains(date))
    }

    /// First day on or after `date` that is not inside any rest period.
    ///
    /// Steps one day at a time so adjacent and overlapping periods are all honoured.
    #[must_use]
    pub fn next_study_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while self.is_rest_day(day) {
            day = next_day(day);
        }
        day
    }

    /// The date of the `count`-th study day, counting `start` itself as the
    /// first when it is a study day. `count = 0` behaves like `count = 1`.
    #[must_use]
    pub fn add_study_days(&self, start: NaiveDate, count: u32) -> NaiveDate {
        let mut day = self.next_study_day(start);
        for _ in 1..count.max(1) {
            day = self.next_study_day(next_day(day));
        }
        day
    }
}

pub(crate) fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}
