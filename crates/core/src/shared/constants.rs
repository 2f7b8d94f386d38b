use std::time::Duration;

/// Ideal capture resolution requested when no other hint is given.
pub const DEFAULT_IDEAL_WIDTH: u32 = 1920;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 1080;

pub const DEFAULT_MAX_FACES: usize = 20;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Detection dispatch spacing (10 Hz target).
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(100);

/// Accepted detection rates in dispatches per second.
pub const MIN_DETECTION_RATE: f64 = 0.01;
pub const MAX_DETECTION_RATE: f64 = 1000.0;

/// Width in pixels of the vertical bar separating the two eyes.
pub const DIVIDER_WIDTH: f64 = 2.0;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
