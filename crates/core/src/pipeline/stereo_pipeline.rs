use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::Serialize;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_source::{CaptureConstraints, CaptureSource, FacingMode};
use crate::capture::domain::device_descriptor::{DeviceDescriptor, DeviceId};
use crate::compositing::domain::render_surface::RenderSurface;
use crate::detection::domain::detection_session_config::{
    ConfigError, DetectionOptionsUpdate, DetectionSessionConfig, ModelVariant,
};
use crate::detection::domain::detection_snapshot::DetectionSnapshot;
use crate::detection::domain::engine_error::EngineError;
use crate::detection::domain::inference_engine::InferenceEngine;
use crate::pipeline::detection_rate_limiter::DetectionRateLimiter;
use crate::pipeline::detection_result_projector::DetectionResultProjector;
use crate::pipeline::face_detection_adapter::{EngineStatus, ErrorCallback, FaceDetectionAdapter};
use crate::pipeline::frame_source_controller::{
    AcquireDone, AcquiredSource, FrameSourceController, SourceLostCallback, SwitchRequest,
};
use crate::pipeline::pipeline_config::PipelineConfig;
use crate::pipeline::pipeline_logger::SharedLogger;
use crate::pipeline::stereo_compositor::StereoCompositor;
use crate::scheduling::domain::clock::Clock;
use crate::scheduling::domain::frame_scheduler::FrameScheduler;

/// External collaborators a pipeline is assembled from.
pub struct PipelineDeps {
    pub capture: Rc<dyn CaptureSource>,
    pub surface: Box<dyn RenderSurface>,
    pub engine: Box<dyn InferenceEngine>,
    pub scheduler: Rc<dyn FrameScheduler>,
    pub clock: Rc<dyn Clock>,
    pub logger: SharedLogger,
}

/// Point-in-time view of the detection path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionStats {
    pub status: EngineStatus,
    /// Latest engine error, cleared when detection is restarted.
    pub last_error: Option<String>,
    pub initialized: bool,
    pub running: bool,
    pub results_received: u64,
    pub dispatches: u64,
    pub max_faces: usize,
    pub min_confidence: f32,
    pub model_variant: ModelVariant,
}

/// Owns the frame source, both loops and the detection path.
///
/// The compositor starts once a source is acquired. The detection loop runs
/// alongside it while detection is enabled. Dropping the pipeline stops
/// everything.
pub struct StereoPipeline {
    source: FrameSourceController,
    compositor: StereoCompositor,
    limiter: DetectionRateLimiter,
    adapter: FaceDetectionAdapter,
    projector: DetectionResultProjector,
    config: Rc<RefCell<PipelineConfig>>,
    detection_enabled: Rc<Cell<bool>>,
}

impl StereoPipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let source = FrameSourceController::new(deps.capture);
        let compositor = StereoCompositor::new(
            source.clone(),
            deps.surface,
            Rc::clone(&deps.scheduler),
            Rc::clone(&deps.logger),
        );
        let adapter = FaceDetectionAdapter::new(deps.engine, &config.session);
        let projector = DetectionResultProjector::new(
            deps.clock,
            Rc::clone(&deps.logger),
            config.session.max_faces,
        );
        let sink = projector.clone();
        adapter.register_result_callback(Box::new(move |batch| {
            sink.project(batch);
        }));
        let limiter = DetectionRateLimiter::new(
            source.clone(),
            adapter.clone(),
            deps.scheduler,
            deps.logger,
            config.detection_interval,
        );

        Ok(Self {
            source,
            compositor,
            limiter,
            adapter,
            projector,
            detection_enabled: Rc::new(Cell::new(config.detection_enabled)),
            config: Rc::new(RefCell::new(config)),
        })
    }

    /// Acquires a source with `constraints` and starts the loops once it is
    /// live. `on_done` sees the acquisition outcome.
    pub fn start(&self, constraints: CaptureConstraints, on_done: AcquireDone) {
        self.source.acquire(constraints, self.on_acquired(on_done));
    }

    /// Starts on the environment-facing camera at the preferred resolution.
    pub fn start_default(&self, on_done: AcquireDone) {
        let resolution = self.config.borrow().preferred_resolution;
        self.start(CaptureConstraints::facing(FacingMode::Environment, resolution), on_done);
    }

    /// Moves to another camera. The loops keep drawing from the current
    /// source until the new one is installed.
    pub fn switch_to(&self, device_id: DeviceId, on_done: AcquireDone) -> SwitchRequest {
        let resolution = self.config.borrow().preferred_resolution;
        self.source
            .switch_to(device_id, resolution, self.on_acquired(on_done))
    }

    fn on_acquired(&self, on_done: AcquireDone) -> AcquireDone {
        let compositor = self.compositor.clone();
        let limiter = self.limiter.clone();
        let adapter = self.adapter.clone();
        let enabled = Rc::clone(&self.detection_enabled);
        Box::new(move |result: Result<AcquiredSource, CaptureError>| {
            if let Ok(acquired) = &result {
                log::info!(
                    "Source {} live ({:?} lens, {} devices)",
                    acquired.device_id,
                    acquired.lens,
                    acquired.devices.len()
                );
                compositor.start();
                if enabled.get() {
                    adapter.reset();
                    adapter.initialize();
                    limiter.start();
                }
            }
            on_done(result);
        })
    }

    /// Enables detection. The engine is initialized now; dispatch begins
    /// with the next frame if a source is live.
    pub fn start_detection(&self) {
        if self.detection_enabled.replace(true) && self.limiter.is_running() {
            return;
        }
        self.adapter.reset();
        self.adapter.initialize();
        if self.source.has_source() {
            self.limiter.start();
        }
        log::info!("Face detection enabled");
    }

    /// Disables detection, releases the engine and publishes an empty
    /// snapshot. Rendering continues.
    pub fn stop_detection(&self) {
        self.detection_enabled.set(false);
        self.limiter.stop();
        self.adapter.shutdown();
        self.projector.clear();
        log::info!("Face detection disabled");
    }

    /// Flips detection on or off and returns the new state.
    pub fn toggle_detection(&self) -> bool {
        if self.detection_enabled.get() {
            self.stop_detection();
        } else {
            self.start_detection();
        }
        self.detection_enabled.get()
    }

    pub fn is_detection_enabled(&self) -> bool {
        self.detection_enabled.get()
    }

    /// Replaces the detection session. The video source is left alone.
    pub fn configure_detection(&self, session: DetectionSessionConfig) -> Result<(), EngineError> {
        self.adapter.configure(&session)?;
        self.projector.set_max_faces(session.max_faces);
        log::info!(
            "Detection configured: {} faces max, confidence {:.2}, {} model",
            session.max_faces,
            session.min_confidence,
            session.model_variant
        );
        self.config.borrow_mut().session = session;
        Ok(())
    }

    /// Merges `update` into the current session and applies the result.
    pub fn update_detection_options(&self, update: &DetectionOptionsUpdate) -> Result<(), EngineError> {
        let merged = self.config.borrow().session.apply(update);
        self.configure_detection(merged)
    }

    pub fn set_detection_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::DetectionRate(f64::INFINITY));
        }
        self.limiter.set_interval(interval);
        self.config.borrow_mut().detection_interval = interval;
        Ok(())
    }

    /// Called with [`CaptureError::DeviceUnavailable`] when the active camera
    /// disappears mid-session. Both loops have already ended by then; a later
    /// `start` or `switch_to` brings them back.
    pub fn register_source_lost_callback(&self, callback: SourceLostCallback) {
        self.source.register_source_lost_callback(callback);
    }

    /// Called for every engine initialization or submit error.
    pub fn register_detection_error_callback(&self, callback: ErrorCallback) {
        self.adapter.register_error_callback(callback);
    }

    pub fn subscribe_detections(&self) -> Receiver<Arc<DetectionSnapshot>> {
        self.projector.subscribe()
    }

    pub fn latest_detections(&self) -> Arc<DetectionSnapshot> {
        self.projector.latest()
    }

    pub fn detection_stats(&self) -> DetectionStats {
        let config = self.config.borrow();
        let status = self.adapter.status();
        DetectionStats {
            status,
            last_error: self.adapter.last_error(),
            initialized: status == EngineStatus::Ready,
            running: self.limiter.is_running(),
            results_received: self.projector.results(),
            dispatches: self.limiter.dispatches(),
            max_faces: config.session.max_faces,
            min_confidence: config.session.min_confidence,
            model_variant: config.session.model_variant,
        }
    }

    /// Devices as of the last successful acquisition.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.source.devices()
    }

    pub fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        self.source.enumerate()
    }

    pub fn active_device_id(&self) -> Option<DeviceId> {
        self.source.active_device_id()
    }

    pub fn source(&self) -> &FrameSourceController {
        &self.source
    }

    pub fn compositor(&self) -> &StereoCompositor {
        &self.compositor
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.borrow().clone()
    }

    /// Stops both loops, releases every hardware track and shuts the engine
    /// down. An acquisition still in flight is discarded when it completes.
    pub fn stop(&self) {
        self.compositor.stop();
        self.limiter.stop();
        self.source.release();
        self.adapter.shutdown();
        self.projector.clear();
    }
}

impl Drop for StereoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
