use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("forecast horizon must be at least 1 day")]
    InvalidForecastHorizon,

    #[error("default review speed must be > 0")]
    InvalidReviewSpeed,

    #[error("default review space must be > 0")]
    InvalidReviewSpace,
}

/// Engine-wide knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    forecast_horizon_days: u32,
    default_review_speed: u32,
    default_review_space: u32,
}

impl EngineSettings {
    /// # Errors
    ///
    /// Returns `SettingsError` if any value is zero.
    pub fn new(
        forecast_horizon_days: u32,
        default_review_speed: u32,
        default_review_space: u32,
    ) -> Result<Self, SettingsError> {
        if forecast_horizon_days == 0 {
            return Err(SettingsError::InvalidForecastHorizon);
        }
        if default_review_speed == 0 {
            return Err(SettingsError::InvalidReviewSpeed);
        }
        if default_review_space == 0 {
            return Err(SettingsError::InvalidReviewSpace);
        }
        Ok(Self {
            forecast_horizon_days,
            default_review_speed,
            default_review_space,
        })
    }

    /// Days the forecast may simulate before giving up.
    #[must_use]
    pub fn forecast_horizon_days(&self) -> u32 {
        self.forecast_horizon_days
    }

    #[must_use]
    pub fn default_review_speed(&self) -> u32 {
        self.default_review_speed
    }

    #[must_use]
    pub fn default_review_space(&self) -> u32 {
        self.default_review_space
    }

    #[must_use]
    pub fn with_forecast_horizon(mut self, days: u32) -> Self {
        self.forecast_horizon_days = days.max(1);
        self
    }
}

impl Default for EngineSettings {
    /// Ten years of forecast, five review items every other day.
    fn default() -> Self {
        Self {
            forecast_horizon_days: 3650,
            default_review_speed: 5,
            default_review_space: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_values() {
        assert_eq!(
            EngineSettings::new(0, 1, 1).unwrap_err(),
            SettingsError::InvalidForecastHorizon
        );
        assert_eq!(
            EngineSettings::new(1, 0, 1).unwrap_err(),
            SettingsError::InvalidReviewSpeed
        );
        assert_eq!(
            EngineSettings::new(1, 1, 0).unwrap_err(),
            SettingsError::InvalidReviewSpace
        );
    }

    #[test]
    fn default_is_valid() {
        let d = EngineSettings::default();
        let rebuilt = EngineSettings::new(
            d.forecast_horizon_days(),
            d.default_review_speed(),
            d.default_review_space(),
        )
        .unwrap();
        assert_eq!(d, rebuilt);
        assert_eq!(d.with_forecast_horizon(0).forecast_horizon_days(), 1);
    }
}
