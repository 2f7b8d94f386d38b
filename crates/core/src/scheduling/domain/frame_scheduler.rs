use std::fmt;
use std::time::Duration;

/// Callback run on the next display refresh, receiving the frame timestamp.
pub type FrameCallback = Box<dyn FnOnce(Duration)>;

/// Identifies one scheduled callback so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TickHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick#{}", self.0)
    }
}

/// Display-refresh scheduling primitive.
///
/// Every loop in the pipeline reschedules itself through this trait; the
/// compositor and the detection limiter share one instance without being
/// coupled to each other.
///
/// Implementations must never invoke a callback from inside
/// `schedule_next_frame` or `cancel`. A cancelled callback must not run.
pub trait FrameScheduler {
    fn schedule_next_frame(&self, callback: FrameCallback) -> TickHandle;

    /// Cancels a scheduled callback. Unknown or already-run handles are ignored.
    fn cancel(&self, handle: TickHandle);
}
