use std::time::Duration;

/// Monotonic time source shared by every loop in the pipeline.
///
/// Readings are offsets from an arbitrary origin fixed at construction.
pub trait Clock {
    fn now(&self) -> Duration;
}
