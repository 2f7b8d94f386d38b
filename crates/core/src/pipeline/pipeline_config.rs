use std::time::Duration;

use crate::capture::domain::capture_source::ResolutionHint;
use crate::detection::domain::detection_session_config::{ConfigError, DetectionSessionConfig};
use crate::shared::constants::{
    DEFAULT_DETECTION_INTERVAL, MAX_DETECTION_RATE, MIN_DETECTION_RATE,
};

/// Settings for one [`StereoPipeline`](crate::pipeline::stereo_pipeline::StereoPipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Minimum spacing between detection dispatches.
    pub detection_interval: Duration,
    pub preferred_resolution: ResolutionHint,
    /// Whether detection runs as soon as a source is acquired.
    pub detection_enabled: bool,
    pub session: DetectionSessionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            preferred_resolution: ResolutionHint::default(),
            detection_enabled: false,
            session: DetectionSessionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the dispatch spacing from a target rate in dispatches per second.
    /// The rate must lie between [`MIN_DETECTION_RATE`] and [`MAX_DETECTION_RATE`].
    pub fn with_detection_rate(mut self, per_second: f64) -> Result<Self, ConfigError> {
        if !(MIN_DETECTION_RATE..=MAX_DETECTION_RATE).contains(&per_second) {
            return Err(ConfigError::DetectionRate(per_second));
        }
        self.detection_interval = Duration::from_secs_f64(1.0 / per_second);
        Ok(self)
    }

    pub fn with_detection_enabled(mut self, enabled: bool) -> Self {
        self.detection_enabled = enabled;
        self
    }

    pub fn with_session(mut self, session: DetectionSessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_interval.is_zero() {
            return Err(ConfigError::DetectionRate(f64::INFINITY));
        }
        self.session.validate()
    }

    /// Target dispatch rate implied by the interval.
    pub fn detection_rate(&self) -> f64 {
        1.0 / self.detection_interval.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.detection_interval, Duration::from_millis(100));
        assert_eq!(config.preferred_resolution.ideal_width, 1920);
        assert_eq!(config.preferred_resolution.ideal_height, 1080);
        assert!(!config.detection_enabled);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(10.0, 100)]
    #[case(4.0, 250)]
    #[case(30.0, 33)]
    #[case(0.01, 100_000)]
    fn test_with_detection_rate(#[case] rate: f64, #[case] expected_ms: u128) {
        let config = PipelineConfig::default().with_detection_rate(rate).unwrap();
        assert_eq!(config.detection_interval.as_millis(), expected_ms);
        assert_relative_eq!(config.detection_rate(), rate, epsilon = 1e-6);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-5.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(1e-30)]
    #[case(0.001)]
    #[case(1e9)]
    fn test_rejects_invalid_rate(#[case] rate: f64) {
        assert!(matches!(
            PipelineConfig::default().with_detection_rate(rate),
            Err(ConfigError::DetectionRate(_))
        ));
    }

    #[test]
    fn test_validate_checks_session() {
        let config = PipelineConfig::default().with_session(DetectionSessionConfig {
            min_confidence: 2.0,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Confidence(_))));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let config = PipelineConfig {
            detection_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
