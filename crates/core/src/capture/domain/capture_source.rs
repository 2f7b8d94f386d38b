use serde::{Deserialize, Serialize};

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::device_descriptor::{DeviceDescriptor, DeviceId};
use crate::shared::constants::{DEFAULT_IDEAL_HEIGHT, DEFAULT_IDEAL_WIDTH};
use crate::shared::frame::SharedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Which device a capture request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Exact(DeviceId),
    Facing(FacingMode),
}

/// Preferred frame size; the platform may deliver something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionHint {
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for ResolutionHint {
    fn default() -> Self {
        Self {
            ideal_width: DEFAULT_IDEAL_WIDTH,
            ideal_height: DEFAULT_IDEAL_HEIGHT,
        }
    }
}

/// Constraints a video source is acquired with. Audio is never requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub selector: DeviceSelector,
    pub resolution: ResolutionHint,
}

impl CaptureConstraints {
    pub fn device(id: DeviceId, resolution: ResolutionHint) -> Self {
        Self {
            selector: DeviceSelector::Exact(id),
            resolution,
        }
    }

    pub fn facing(mode: FacingMode, resolution: ResolutionHint) -> Self {
        Self {
            selector: DeviceSelector::Facing(mode),
            resolution,
        }
    }

    pub fn requested_device(&self) -> Option<&DeviceId> {
        match &self.selector {
            DeviceSelector::Exact(id) => Some(id),
            DeviceSelector::Facing(_) => None,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::facing(FacingMode::Environment, ResolutionHint::default())
    }
}

/// How much media a stream has buffered, ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// Whether the current frame can be painted or handed to inference.
    pub fn is_paintable(self) -> bool {
        self == Self::HaveEnoughData
    }
}

/// Settings the platform actually applied to a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSettings {
    pub device_id: Option<DeviceId>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub facing_mode: Option<FacingMode>,
}

/// One hardware track of an acquired stream.
pub trait MediaTrack {
    fn label(&self) -> &str;

    fn settings(&self) -> TrackSettings;

    /// Releases the hardware behind this track. Idempotent.
    fn stop(&mut self);

    /// False once stopped or once the device went away.
    fn is_live(&self) -> bool;
}

/// A live capture session.
pub trait VideoStream {
    fn tracks(&self) -> &[Box<dyn MediaTrack>];

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>];

    fn ready_state(&self) -> ReadyState;

    /// Most recent decoded frame, if any has arrived yet.
    fn current_frame(&self) -> Option<SharedFrame>;
}

pub type AcquireCallback = Box<dyn FnOnce(Result<Box<dyn VideoStream>, CaptureError>)>;

/// Platform capture facility.
///
/// `acquire_stream` may answer synchronously or later; implementations must
/// not hold internal borrows while invoking `done`, since the callback may
/// call back into `list_devices`.
pub trait CaptureSource {
    fn acquire_stream(&self, constraints: &CaptureConstraints, done: AcquireCallback);

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;
}
