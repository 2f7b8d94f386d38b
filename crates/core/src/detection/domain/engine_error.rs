use thiserror::Error;

use crate::detection::domain::detection_session_config::ConfigError;

/// Failures on the detection path. None of these ever stop rendering.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("inference engine failed to initialize: {0}")]
    InitFailure(String),
    #[error("frame submission failed: {0}")]
    SubmitFailure(String),
    #[error("invalid detection configuration: {0}")]
    Configure(#[from] ConfigError),
    #[error("inference engine has been shut down")]
    ShutDown,
}
