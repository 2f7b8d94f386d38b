use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::inference_engine::EngineOptions;
use crate::shared::constants::{DEFAULT_MAX_FACES, DEFAULT_MIN_CONFIDENCE};

/// Which BlazeFace model the engine runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Faces within roughly two metres of the camera.
    #[default]
    ShortRange,
    /// Faces up to roughly five metres away.
    FullRange,
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortRange => write!(f, "short_range"),
            Self::FullRange => write!(f, "full_range"),
        }
    }
}

impl std::str::FromStr for ModelVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" | "short_range" => Ok(Self::ShortRange),
            "full" | "full_range" => Ok(Self::FullRange),
            other => Err(ConfigError::UnknownModel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("minimum confidence must be within [0, 1], got {0}")]
    Confidence(f32),
    #[error("max faces must be at least 1")]
    MaxFaces,
    #[error("unknown model variant: {0}")]
    UnknownModel(String),
    #[error("detection rate must be between 0.01 and 1000 results per second, got {0}")]
    DetectionRate(f64),
}

/// Detection settings for one session. Replaced wholesale, never mutated in
/// place by the detection path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSessionConfig {
    pub max_faces: usize,
    pub min_confidence: f32,
    pub model_variant: ModelVariant,
}

impl Default for DetectionSessionConfig {
    fn default() -> Self {
        Self {
            max_faces: DEFAULT_MAX_FACES,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            model_variant: ModelVariant::default(),
        }
    }
}

impl DetectionSessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Confidence(self.min_confidence));
        }
        if self.max_faces == 0 {
            return Err(ConfigError::MaxFaces);
        }
        Ok(())
    }

    /// The subset of the session the engine itself needs.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            model_variant: self.model_variant,
            min_confidence: self.min_confidence,
        }
    }

    /// Returns a new config with the fields present in `update` replaced.
    pub fn apply(&self, update: &DetectionOptionsUpdate) -> Self {
        Self {
            max_faces: update.max_faces.unwrap_or(self.max_faces),
            min_confidence: update.min_confidence.unwrap_or(self.min_confidence),
            model_variant: update.model_variant.unwrap_or(self.model_variant),
        }
    }
}

/// A partial change to a [`DetectionSessionConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionOptionsUpdate {
    pub max_faces: Option<usize>,
    pub min_confidence: Option<f32>,
    pub model_variant: Option<ModelVariant>,
}
