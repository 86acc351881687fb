use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::ids::SubjectId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubjectError {
    #[error("subject label cannot be empty")]
    EmptyLabel,

    #[error("review speed must be > 0")]
    InvalidReviewSpeed,

    #[error("review space must be > 0")]
    InvalidReviewSpace,
}

/// A subject a student is enrolled in, with its review pacing.
///
/// `review_speed` caps how many review items resurface per cycle and
/// `review_space` is the cycle length in days, mirroring block pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    id: SubjectId,
    label: String,
    review_speed: u32,
    review_space: u32,
}

impl Subject {
    /// # Errors
    ///
    /// Returns `SubjectError` for a blank label or zero review pacing.
    pub fn new(
        id: SubjectId,
        label: impl Into<String>,
        review_speed: u32,
        review_space: u32,
    ) -> Result<Self, SubjectError> {
        let label = label.into().trim().to_owned();
        if label.is_empty() {
            return Err(SubjectError::EmptyLabel);
        }
        if review_speed == 0 {
            return Err(SubjectError::InvalidReviewSpeed);
        }
        if review_space == 0 {
            return Err(SubjectError::InvalidReviewSpace);
        }
        Ok(Self {
            id,
            label,
            review_speed,
            review_space,
        })
    }

    #[must_use]
    pub fn id(&self) -> SubjectId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn review_speed(&self) -> u32 {
        self.review_speed
    }

    #[must_use]
    pub fn review_space(&self) -> u32 {
        self.review_space
    }
}

/// Display labels for subjects, kept apart from every id-keyed map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectLabels(BTreeMap<SubjectId, String>);

impl SubjectLabels {
    #[must_use]
    pub fn from_subjects<'a>(subjects: impl IntoIterator<Item = &'a Subject>) -> Self {
        Self(
            subjects
                .into_iter()
                .map(|s| (s.id(), s.label().to_owned()))
                .collect(),
        )
    }

    #[must_use]
    pub fn label(&self, id: SubjectId) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }
}
