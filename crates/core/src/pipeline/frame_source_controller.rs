use std::cell::RefCell;
use std::rc::Rc;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_source::{
    CaptureConstraints, CaptureSource, ResolutionHint, VideoStream,
};
use crate::capture::domain::device_descriptor::{DeviceDescriptor, DeviceId};
use crate::capture::domain::lens_classifier::{classify_lens, LensKind};
use crate::shared::frame::SharedFrame;

/// The one live capture session, owned by [`FrameSourceController`].
pub struct VideoSourceHandle {
    device_id: DeviceId,
    stream: Box<dyn VideoStream>,
    constraints: CaptureConstraints,
}

impl VideoSourceHandle {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn live_tracks(&self) -> usize {
        self.stream.tracks().iter().filter(|t| t.is_live()).count()
    }

    /// Every track has ended without [`FrameSourceController::release`]
    /// being called, e.g. the device was unplugged.
    fn has_ended(&self) -> bool {
        let tracks = self.stream.tracks();
        !tracks.is_empty() && tracks.iter().all(|t| !t.is_live())
    }

    fn stop_all(&mut self) {
        stop_tracks(self.stream.as_mut());
    }
}

fn stop_tracks(stream: &mut dyn VideoStream) {
    for track in stream.tracks_mut() {
        track.stop();
    }
}

/// What a successful acquisition reports back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredSource {
    pub device_id: DeviceId,
    pub label: String,
    /// Advisory guess from the track label; nothing in the pipeline uses it.
    pub lens: LensKind,
    pub devices: Vec<DeviceDescriptor>,
}

pub type AcquireDone = Box<dyn FnOnce(Result<AcquiredSource, CaptureError>)>;

/// Invoked once per handle whose tracks end on their own.
pub type SourceLostCallback = Box<dyn FnMut(CaptureError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRequest {
    /// The device is already active; nothing was stopped or requested.
    AlreadyActive,
    Requested,
}

/// What a loop tick sees when it asks for the current frame.
#[derive(Debug, Clone)]
pub enum FrameAvailability {
    NoSource,
    /// The active source ended underneath us and has just been cleared.
    Gone,
    NotReady,
    Ready(SharedFrame),
}

/// Owns acquisition, switching and teardown of the active video source.
///
/// Cloning yields another handle onto the same controller. Only the latest
/// acquisition request may install its stream; an older request that
/// completes afterwards has its tracks stopped and reports
/// [`CaptureError::Superseded`].
#[derive(Clone)]
pub struct FrameSourceController {
    capture: Rc<dyn CaptureSource>,
    state: Rc<RefCell<SourceState>>,
}

#[derive(Default)]
struct SourceState {
    active: Option<VideoSourceHandle>,
    devices: Vec<DeviceDescriptor>,
    generation: u64,
    acquiring: bool,
    has_permission: bool,
    on_source_lost: Option<SourceLostCallback>,
}

impl FrameSourceController {
    pub fn new(capture: Rc<dyn CaptureSource>) -> Self {
        Self {
            capture,
            state: Rc::new(RefCell::new(SourceState::default())),
        }
    }

    /// Requests a new source. On success the previous handle's tracks are
    /// stopped before the new handle is installed; on failure the previous
    /// handle stays as it was.
    pub fn acquire(&self, constraints: CaptureConstraints, on_done: AcquireDone) {
        let generation = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.acquiring = true;
            state.generation
        };
        log::info!("Acquiring video source ({:?})", constraints.selector);

        let weak = Rc::downgrade(&self.state);
        let capture = Rc::clone(&self.capture);
        let request = constraints.clone();
        self.capture.acquire_stream(
            &request,
            Box::new(move |result| {
                let outcome = match weak.upgrade() {
                    Some(state) => complete(&state, capture.as_ref(), generation, constraints, result),
                    None => {
                        if let Ok(mut stream) = result {
                            stop_tracks(stream.as_mut());
                        }
                        Err(CaptureError::Superseded)
                    }
                };
                on_done(outcome);
            }),
        );
    }

    /// Acquires `device_id` unless it is already the active device.
    pub fn switch_to(
        &self,
        device_id: DeviceId,
        resolution: ResolutionHint,
        on_done: AcquireDone,
    ) -> SwitchRequest {
        if self.active_device_id().as_ref() == Some(&device_id) {
            log::debug!("Device {device_id} already active");
            return SwitchRequest::AlreadyActive;
        }
        self.acquire(CaptureConstraints::device(device_id, resolution), on_done);
        SwitchRequest::Requested
    }

    /// Stops every track of the active handle and clears it. Also makes any
    /// in-flight acquisition stale. Idempotent.
    pub fn release(&self) {
        let previous = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.acquiring = false;
            state.active.take()
        };
        if let Some(mut handle) = previous {
            handle.stop_all();
            log::info!("Released video source {}", handle.device_id);
        }
    }

    /// Video inputs from the capture source; labels are only populated once
    /// permission has been granted.
    pub fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let devices = video_inputs(self.capture.list_devices()?);
        self.state.borrow_mut().devices = devices.clone();
        Ok(devices)
    }

    /// Device list as of the last enumeration.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.state.borrow().devices.clone()
    }

    /// Replaces the callback told about a source that ended on its own.
    pub fn register_source_lost_callback(&self, callback: SourceLostCallback) {
        self.state.borrow_mut().on_source_lost = Some(callback);
    }

    /// Current frame of the active source. A source whose tracks have all
    /// ended is cleared here, reported as [`FrameAvailability::Gone`] once,
    /// and announced to the source-lost callback.
    pub fn frame_availability(&self) -> FrameAvailability {
        {
            let state = self.state.borrow();
            let Some(handle) = state.active.as_ref() else {
                return FrameAvailability::NoSource;
            };
            if !handle.has_ended() {
                if !handle.stream.ready_state().is_paintable() {
                    return FrameAvailability::NotReady;
                }
                return match handle.stream.current_frame() {
                    Some(frame) => FrameAvailability::Ready(frame),
                    None => FrameAvailability::NotReady,
                };
            }
        }
        self.drop_ended_source();
        FrameAvailability::Gone
    }

    fn drop_ended_source(&self) {
        let (mut lost, callback) = {
            let mut state = self.state.borrow_mut();
            match state.active.take() {
                Some(handle) => (handle, state.on_source_lost.take()),
                None => return,
            }
        };
        lost.stop_all();
        log::warn!("Video source {} ended unexpectedly", lost.device_id);

        let Some(mut callback) = callback else {
            return;
        };
        callback(CaptureError::DeviceUnavailable(lost.device_id.to_string()));
        let mut state = self.state.borrow_mut();
        if state.on_source_lost.is_none() {
            state.on_source_lost = Some(callback);
        }
    }

    pub fn active_device_id(&self) -> Option<DeviceId> {
        self.state
            .borrow()
            .active
            .as_ref()
            .map(|h| h.device_id.clone())
    }

    pub fn has_source(&self) -> bool {
        self.state.borrow().active.is_some()
    }

    pub fn live_tracks(&self) -> usize {
        self.state
            .borrow()
            .active
            .as_ref()
            .map(VideoSourceHandle::live_tracks)
            .unwrap_or(0)
    }

    pub fn has_permission(&self) -> bool {
        self.state.borrow().has_permission
    }

    pub fn is_acquiring(&self) -> bool {
        self.state.borrow().acquiring
    }
}

fn video_inputs(devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    devices.into_iter().filter(|d| d.is_video_input()).collect()
}

fn complete(
    state: &Rc<RefCell<SourceState>>,
    capture: &dyn CaptureSource,
    generation: u64,
    constraints: CaptureConstraints,
    result: Result<Box<dyn VideoStream>, CaptureError>,
) -> Result<AcquiredSource, CaptureError> {
    let current = state.borrow().generation == generation;
    let stream = match result {
        Ok(mut stream) if !current => {
            stop_tracks(stream.as_mut());
            log::debug!("Discarding stale acquisition {generation}");
            return Err(CaptureError::Superseded);
        }
        Err(_) if !current => return Err(CaptureError::Superseded),
        Err(e) => {
            let mut s = state.borrow_mut();
            s.acquiring = false;
            if e.is_access_denied() {
                s.has_permission = false;
            }
            log::warn!("Camera acquisition failed: {e}");
            return Err(e);
        }
        Ok(stream) => stream,
    };

    let (label, settings) = stream
        .tracks()
        .first()
        .map(|t| (t.label().to_string(), t.settings()))
        .unwrap_or_default();
    let device_id = settings
        .device_id
        .or_else(|| constraints.requested_device().cloned())
        .unwrap_or_else(|| DeviceId::new(""));
    let lens = classify_lens(&label);

    let previous = state.borrow_mut().active.take();
    if let Some(mut old) = previous {
        old.stop_all();
        log::debug!("Stopped tracks of {}", old.device_id);
    }

    // Labels only become visible after permission, so refresh now.
    let devices = match capture.list_devices() {
        Ok(devices) => Some(video_inputs(devices)),
        Err(e) => {
            log::warn!("Device enumeration failed: {e}");
            None
        }
    };

    let mut s = state.borrow_mut();
    if let Some(devices) = devices {
        s.devices = devices;
    }
    if stream.tracks().is_empty() {
        log::warn!("Acquired stream has no video tracks");
    }
    s.active = Some(VideoSourceHandle {
        device_id: device_id.clone(),
        stream,
        constraints,
    });
    s.acquiring = false;
    s.has_permission = true;
    log::info!("Video source active: {device_id} ({label}, {lens:?})");

    Ok(AcquiredSource {
        device_id,
        label,
        lens,
        devices: s.devices.clone(),
    })
}
