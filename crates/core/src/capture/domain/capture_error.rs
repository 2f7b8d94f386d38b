use thiserror::Error;

/// Failures reported to callers of `acquire` / `switch_to`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Capture permission was refused; a later acquire may re-prompt.
    #[error("camera access denied: {0}")]
    AccessDenied(String),

    /// No device matches the constraints, or it disappeared mid-session.
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera acquisition failed: {0}")]
    Acquisition(String),

    /// A newer acquire or a release overtook this request; the stream it
    /// produced has already been stopped.
    #[error("camera acquisition superseded")]
    Superseded,
}

impl CaptureError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
