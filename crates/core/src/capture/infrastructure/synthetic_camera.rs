use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_source::{
    AcquireCallback, CaptureConstraints, CaptureSource, DeviceSelector, FacingMode, MediaTrack,
    ReadyState, TrackSettings, VideoStream,
};
use crate::capture::domain::device_descriptor::{DeviceDescriptor, DeviceId, DeviceKind};
use crate::scheduling::domain::clock::Clock;
use crate::scheduling::domain::frame_scheduler::FrameScheduler;
use crate::shared::frame::{Frame, SharedFrame};

/// Time between opening a stream and its first paintable frame.
const DEFAULT_WARMUP: Duration = Duration::from_millis(50);

/// A simulated camera exposed by [`SyntheticCamera`].
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticDevice {
    pub id: DeviceId,
    pub label: String,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl SyntheticDevice {
    pub fn new(id: &str, label: &str, facing: FacingMode, width: u32, height: u32) -> Self {
        Self {
            id: DeviceId::new(id),
            label: label.to_string(),
            facing,
            width,
            height,
            frame_rate: 30.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionPolicy {
    Grant,
    Deny,
}

/// Capture source producing animated test-pattern streams.
///
/// Behaves like a browser capture stack: acquisition answers on a later
/// display refresh, labels are withheld until permission has been granted
/// once, and every hardware track it hands out stays observable through
/// [`live_track_count`](Self::live_track_count).
pub struct SyntheticCamera {
    scheduler: Rc<dyn FrameScheduler>,
    clock: Rc<dyn Clock>,
    state: Rc<RefCell<CameraState>>,
}

struct CameraState {
    devices: Vec<SyntheticDevice>,
    permission: PermissionPolicy,
    permission_granted: bool,
    acquire_delay_frames: u32,
    warmup: Duration,
    tracks: Vec<Rc<TrackLiveness>>,
    acquisitions: u64,
}

struct TrackLiveness {
    device_id: DeviceId,
    live: Cell<bool>,
}

impl SyntheticCamera {
    pub fn new(scheduler: Rc<dyn FrameScheduler>, clock: Rc<dyn Clock>) -> Self {
        Self::with_devices(scheduler, clock, default_devices())
    }

    pub fn with_devices(
        scheduler: Rc<dyn FrameScheduler>,
        clock: Rc<dyn Clock>,
        devices: Vec<SyntheticDevice>,
    ) -> Self {
        Self {
            scheduler,
            clock,
            state: Rc::new(RefCell::new(CameraState {
                devices,
                permission: PermissionPolicy::Grant,
                permission_granted: false,
                acquire_delay_frames: 1,
                warmup: DEFAULT_WARMUP,
                tracks: Vec::new(),
                acquisitions: 0,
            })),
        }
    }

    pub fn set_permission(&self, policy: PermissionPolicy) {
        self.state.borrow_mut().permission = policy;
    }

    /// Display refreshes between a request and its answer (minimum 1).
    pub fn set_acquire_delay_frames(&self, frames: u32) {
        self.state.borrow_mut().acquire_delay_frames = frames.max(1);
    }

    pub fn set_warmup(&self, warmup: Duration) {
        self.state.borrow_mut().warmup = warmup;
    }

    /// Tracks handed out and not yet stopped.
    pub fn live_track_count(&self) -> usize {
        self.state
            .borrow()
            .tracks
            .iter()
            .filter(|t| t.live.get())
            .count()
    }

    /// Successful hardware acquisitions so far.
    pub fn acquisitions(&self) -> u64 {
        self.state.borrow().acquisitions
    }

    /// Simulates unplugging a device: its tracks end and it leaves the list.
    pub fn disconnect(&self, id: &DeviceId) {
        let mut state = self.state.borrow_mut();
        for track in state.tracks.iter().filter(|t| &t.device_id == id) {
            track.live.set(false);
        }
        state.devices.retain(|d| &d.id != id);
    }
}

impl CaptureSource for SyntheticCamera {
    fn acquire_stream(&self, constraints: &CaptureConstraints, done: AcquireCallback) {
        let delay = self.state.borrow().acquire_delay_frames;
        let state = Rc::clone(&self.state);
        let clock = Rc::clone(&self.clock);
        let constraints = constraints.clone();
        defer_frames(
            Rc::clone(&self.scheduler),
            delay,
            Box::new(move || {
                let result = open_stream(&state, clock, &constraints);
                done(result);
            }),
        );
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let state = self.state.borrow();
        let labelled = |label: &str| {
            if state.permission_granted {
                label.to_string()
            } else {
                String::new()
            }
        };
        let mut devices: Vec<DeviceDescriptor> = state
            .devices
            .iter()
            .map(|d| DeviceDescriptor {
                id: d.id.clone(),
                label: labelled(&d.label),
                kind: DeviceKind::VideoInput,
            })
            .collect();
        devices.push(DeviceDescriptor {
            id: DeviceId::new("synthetic-mic"),
            label: labelled("Synthetic Microphone"),
            kind: DeviceKind::AudioInput,
        });
        Ok(devices)
    }
}

fn default_devices() -> Vec<SyntheticDevice> {
    vec![
        SyntheticDevice::new("synthetic-back", "Back Camera", FacingMode::Environment, 1280, 720),
        SyntheticDevice::new(
            "synthetic-back-ultra",
            "Back Ultra Wide Camera",
            FacingMode::Environment,
            1280,
            720,
        ),
        SyntheticDevice::new("synthetic-front", "Front Camera", FacingMode::User, 640, 480),
    ]
}

/// Runs `task` after `frames` display refreshes.
fn defer_frames(scheduler: Rc<dyn FrameScheduler>, frames: u32, task: Box<dyn FnOnce()>) {
    let next = Rc::clone(&scheduler);
    scheduler.schedule_next_frame(Box::new(move |_| {
        if frames <= 1 {
            task();
        } else {
            defer_frames(next, frames - 1, task);
        }
    }));
}

fn open_stream(
    state: &Rc<RefCell<CameraState>>,
    clock: Rc<dyn Clock>,
    constraints: &CaptureConstraints,
) -> Result<Box<dyn VideoStream>, CaptureError> {
    let mut state = state.borrow_mut();
    if state.permission == PermissionPolicy::Deny {
        return Err(CaptureError::AccessDenied(
            "permission to use the camera was denied".to_string(),
        ));
    }

    let device = match &constraints.selector {
        DeviceSelector::Exact(id) => state
            .devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no camera with id {id}")))?,
        DeviceSelector::Facing(mode) => state
            .devices
            .iter()
            .find(|d| d.facing == *mode)
            .or_else(|| state.devices.first())
            .cloned()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no video input devices".to_string()))?,
    };

    state.permission_granted = true;
    state.acquisitions += 1;
    let liveness = Rc::new(TrackLiveness {
        device_id: device.id.clone(),
        live: Cell::new(true),
    });
    state.tracks.push(Rc::clone(&liveness));
    let warmup = state.warmup;

    log::debug!("Synthetic camera opened {} ({}x{})", device.id, device.width, device.height);
    Ok(Box::new(SyntheticStream::new(device, liveness, clock, warmup)))
}

struct SyntheticTrack {
    label: String,
    settings: TrackSettings,
    liveness: Rc<TrackLiveness>,
}

impl MediaTrack for SyntheticTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn stop(&mut self) {
        self.liveness.live.set(false);
    }

    fn is_live(&self) -> bool {
        self.liveness.live.get()
    }
}

struct SyntheticStream {
    tracks: Vec<Box<dyn MediaTrack>>,
    liveness: Rc<TrackLiveness>,
    device: SyntheticDevice,
    clock: Rc<dyn Clock>,
    opened_at: Duration,
    warmup: Duration,
    cache: RefCell<Option<SharedFrame>>,
}

impl SyntheticStream {
    fn new(
        device: SyntheticDevice,
        liveness: Rc<TrackLiveness>,
        clock: Rc<dyn Clock>,
        warmup: Duration,
    ) -> Self {
        let track = SyntheticTrack {
            label: device.label.clone(),
            settings: TrackSettings {
                device_id: Some(device.id.clone()),
                width: Some(device.width),
                height: Some(device.height),
                frame_rate: Some(device.frame_rate),
                facing_mode: Some(device.facing),
            },
            liveness: Rc::clone(&liveness),
        };
        let opened_at = clock.now();
        Self {
            tracks: vec![Box::new(track)],
            liveness,
            device,
            clock,
            opened_at,
            warmup,
            cache: RefCell::new(None),
        }
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.opened_at)
    }
}

impl VideoStream for SyntheticStream {
    fn tracks(&self) -> &[Box<dyn MediaTrack>] {
        &self.tracks
    }

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>] {
        &mut self.tracks
    }

    fn ready_state(&self) -> ReadyState {
        if !self.liveness.live.get() {
            ReadyState::HaveNothing
        } else if self.elapsed() < self.warmup {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveEnoughData
        }
    }

    fn current_frame(&self) -> Option<SharedFrame> {
        if self.ready_state() < ReadyState::HaveCurrentData {
            return None;
        }
        let sequence = (self.elapsed().as_secs_f64() * self.device.frame_rate) as u64;
        let mut cache = self.cache.borrow_mut();
        if let Some(frame) = cache.as_ref().filter(|f| f.sequence() == sequence) {
            return Some(Arc::clone(frame));
        }
        let frame = Arc::new(test_pattern(self.device.width, self.device.height, sequence));
        *cache = Some(Arc::clone(&frame));
        Some(frame)
    }
}

/// Colour gradient with a bright vertical bar that sweeps across the frame.
fn test_pattern(width: u32, height: u32, sequence: u64) -> Frame {
    let w = width.max(1) as usize;
    let h = height.max(1) as usize;
    let bar_width = (w / 16).max(1);
    let bar_x = (sequence as usize * 8) % w;

    let mut frame = Frame::new(vec![0u8; w * h * 3], w as u32, h as u32, 3, sequence);
    {
        let mut pixels = frame.as_ndarray_mut();
        for ((y, x, c), value) in pixels.indexed_iter_mut() {
            *value = if x >= bar_x && x < bar_x + bar_width {
                235
            } else {
                match c {
                    0 => (x * 255 / w) as u8,
                    1 => (y * 255 / h) as u8,
                    _ => 96,
                }
            };
        }
    }
    frame
}
