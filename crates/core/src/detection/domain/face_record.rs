use std::fmt;

use serde::Serialize;

use crate::detection::domain::inference_engine::{Keypoint, RawBoundingBox, RawDetection};

/// Index of a face within one detection batch. Not stable across batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FaceId(pub usize);

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face-{}", self.0)
    }
}

/// Normalized box with its centre precomputed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub x_center: f32,
    pub y_center: f32,
}

impl From<&RawBoundingBox> for BoundingBox {
    fn from(raw: &RawBoundingBox) -> Self {
        Self {
            x: raw.x_min,
            y: raw.y_min,
            width: raw.width,
            height: raw.height,
            x_center: raw.x_min + raw.width / 2.0,
            y_center: raw.y_min + raw.height / 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRecord {
    pub id: FaceId,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub landmarks: Option<Vec<Keypoint>>,
}

impl FaceRecord {
    /// Builds the record for the `index`-th detection of a batch. A missing
    /// score reads as zero confidence.
    ///
    /// Scores inside [0, 1] are carried over as reported. A score outside
    /// that range is clamped, since a record's confidence is always in [0, 1].
    pub fn from_raw(index: usize, raw: &RawDetection) -> Self {
        let confidence = raw.scores.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
        Self {
            id: FaceId(index),
            bounding_box: BoundingBox::from(&raw.bounding_box),
            confidence,
            landmarks: raw.landmarks.clone(),
        }
    }
}
