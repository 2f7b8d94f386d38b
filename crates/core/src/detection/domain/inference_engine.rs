use serde::Serialize;

use crate::detection::domain::detection_session_config::ModelVariant;
use crate::detection::domain::engine_error::EngineError;
use crate::shared::frame::SharedFrame;

/// Bounding box relative to the frame, each field in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub width: f32,
    pub height: f32,
}

/// A landmark relative to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// One detection as reported by the engine. `scores[0]` is the face score.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bounding_box: RawBoundingBox,
    pub scores: Vec<f32>,
    pub landmarks: Option<Vec<Keypoint>>,
}

/// Everything one inference call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetectionBatch {
    pub detections: Vec<RawDetection>,
    /// Sequence number of the frame the batch was computed from.
    pub frame_sequence: u64,
}

/// Engine-level knobs derived from the session config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub model_variant: ModelVariant,
    pub min_confidence: f32,
}

pub type InitCallback = Box<dyn FnOnce(Result<(), EngineError>)>;
pub type ResultCallback = Box<dyn FnMut(RawDetectionBatch)>;

/// External face-detection engine.
///
/// Every callback is delivered asynchronously, never from inside the call
/// that triggered it, and results may arrive in any order relative to the
/// submissions that produced them.
pub trait InferenceEngine {
    /// Starts loading the model. `done` fires once, when loading finishes.
    fn initialize(&mut self, done: InitCallback);

    fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError>;

    /// Replaces any previously registered callback.
    fn register_result_callback(&mut self, callback: ResultCallback);

    /// Queues a frame for inference without waiting for the result.
    fn submit(&mut self, frame: SharedFrame) -> Result<(), EngineError>;

    /// Releases model resources and drops undelivered results. Idempotent,
    /// and safe before `initialize`.
    fn shutdown(&mut self);
}
