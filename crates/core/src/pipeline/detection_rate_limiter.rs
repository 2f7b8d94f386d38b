use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::pipeline::face_detection_adapter::{EngineStatus, FaceDetectionAdapter, SubmitOutcome};
use crate::pipeline::frame_source_controller::{FrameAvailability, FrameSourceController};
use crate::pipeline::pipeline_logger::SharedLogger;
use crate::scheduling::domain::frame_scheduler::{FrameScheduler, TickHandle};
use crate::shared::constants::{MAX_DETECTION_RATE, MIN_DETECTION_RATE};

/// Last dispatch time and the minimum spacing between dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterState {
    last_dispatch: Option<Duration>,
    interval: Duration,
}

impl RateLimiterState {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_dispatch: None,
            interval,
        }
    }

    /// Spacing for a target rate in dispatches per second, clamped between
    /// [`MIN_DETECTION_RATE`] and [`MAX_DETECTION_RATE`]. NaN reads as the
    /// minimum.
    pub fn from_rate(per_second: f64) -> Self {
        let rate = if per_second.is_nan() {
            MIN_DETECTION_RATE
        } else {
            per_second.clamp(MIN_DETECTION_RATE, MAX_DETECTION_RATE)
        };
        Self::new(Duration::from_secs_f64(1.0 / rate))
    }

    /// Claims a dispatch slot at `now` if the interval has elapsed since the
    /// previous one. The first call always succeeds.
    pub fn try_dispatch(&mut self, now: Duration) -> bool {
        let due = match self.last_dispatch {
            None => true,
            Some(last) => now >= last && now - last >= self.interval,
        };
        if due {
            self.last_dispatch = Some(now);
        }
        due
    }

    /// Forgets the previous dispatch so the next call succeeds immediately.
    pub fn reset(&mut self) {
        self.last_dispatch = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn last_dispatch(&self) -> Option<Duration> {
        self.last_dispatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(SubmitOutcome),
    /// Too soon after the previous dispatch.
    Throttled,
    NotReady,
    /// The engine failed or was shut down; the loop ends.
    EngineUnavailable,
    /// No source any more; the loop ends.
    Stopped,
}

/// Detection loop forwarding frames to the adapter no faster than the
/// configured interval.
///
/// Runs on the same display-refresh scheduler as the compositor but keeps
/// its own pending tick, so either loop can stop without the other.
#[derive(Clone)]
pub struct DetectionRateLimiter {
    inner: Rc<LimiterInner>,
}

struct LimiterInner {
    source: FrameSourceController,
    adapter: FaceDetectionAdapter,
    scheduler: Rc<dyn FrameScheduler>,
    logger: SharedLogger,
    state: RefCell<LimiterLoop>,
}

struct LimiterLoop {
    limiter: RateLimiterState,
    running: bool,
    pending: Option<TickHandle>,
    dispatches: u64,
}

impl DetectionRateLimiter {
    pub fn new(
        source: FrameSourceController,
        adapter: FaceDetectionAdapter,
        scheduler: Rc<dyn FrameScheduler>,
        logger: SharedLogger,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Rc::new(LimiterInner {
                source,
                adapter,
                scheduler,
                logger,
                state: RefCell::new(LimiterLoop {
                    limiter: RateLimiterState::new(interval),
                    running: false,
                    pending: None,
                    dispatches: 0,
                }),
            }),
        }
    }

    /// Starts the loop; the first ready frame is dispatched immediately.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.running {
                return;
            }
            state.running = true;
            state.limiter.reset();
        }
        log::info!(
            "Detection loop started ({:.1} Hz target)",
            1.0 / self.interval().as_secs_f64()
        );
        self.schedule_tick();
    }

    pub fn stop(&self) {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            if state.running {
                log::info!("Detection loop stopped after {} dispatches", state.dispatches);
            }
            state.running = false;
            state.pending.take()
        };
        if let Some(handle) = pending {
            self.inner.scheduler.cancel(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().running
    }

    pub fn has_pending_tick(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }

    pub fn dispatches(&self) -> u64 {
        self.inner.state.borrow().dispatches
    }

    pub fn interval(&self) -> Duration {
        self.inner.state.borrow().limiter.interval()
    }

    pub fn set_interval(&self, interval: Duration) {
        self.inner.state.borrow_mut().limiter.set_interval(interval);
    }

    pub fn last_dispatch(&self) -> Option<Duration> {
        self.inner.state.borrow().limiter.last_dispatch()
    }

    fn schedule_tick(&self) {
        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_next_frame(Box::new(move |now| {
            if let Some(inner) = weak.upgrade() {
                DetectionRateLimiter { inner }.on_tick(now);
            }
        }));
        self.inner.state.borrow_mut().pending = Some(handle);
    }

    fn on_tick(&self, now: Duration) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.pending = None;
            if !state.running {
                return;
            }
        }
        match self.tick_once(now) {
            DispatchOutcome::Stopped => {
                self.inner.state.borrow_mut().running = false;
                log::info!("Video source gone, detection loop stopped");
            }
            DispatchOutcome::EngineUnavailable => {
                self.inner.state.borrow_mut().running = false;
                log::warn!(
                    "Detection engine {:?}, detection loop stopped",
                    self.inner.adapter.status()
                );
            }
            _ => self.schedule_tick(),
        }
    }

    /// One loop iteration at time `now`. The readiness checks come before
    /// the rate gate so unready ticks never consume a dispatch slot, and
    /// only frames the adapter can still take count as dispatches.
    pub fn tick_once(&self, now: Duration) -> DispatchOutcome {
        let frame = match self.inner.source.frame_availability() {
            FrameAvailability::NoSource | FrameAvailability::Gone => {
                return DispatchOutcome::Stopped
            }
            FrameAvailability::NotReady => {
                self.inner.logger.borrow_mut().count("detect.not_ready");
                return DispatchOutcome::NotReady;
            }
            FrameAvailability::Ready(frame) => frame,
        };
        if matches!(
            self.inner.adapter.status(),
            EngineStatus::Failed | EngineStatus::ShutDown
        ) {
            self.inner.logger.borrow_mut().count("detect.engine_unavailable");
            return DispatchOutcome::EngineUnavailable;
        }

        {
            let mut state = self.inner.state.borrow_mut();
            if !state.limiter.try_dispatch(now) {
                return DispatchOutcome::Throttled;
            }
            state.dispatches += 1;
        }

        let outcome = self.inner.adapter.submit(frame);
        let mut logger = self.inner.logger.borrow_mut();
        logger.count("detect.dispatched");
        match outcome {
            SubmitOutcome::Dispatched => {}
            SubmitOutcome::Deferred => logger.count("detect.deferred"),
            SubmitOutcome::Dropped => logger.count("detect.dropped"),
            SubmitOutcome::Failed => logger.count("detect.submit_failed"),
        }
        DispatchOutcome::Dispatched(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::capture_source::{CaptureConstraints, FacingMode};
    use crate::capture::domain::device_descriptor::DeviceId;
    use crate::capture::infrastructure::synthetic_camera::{SyntheticCamera, SyntheticDevice};
    use crate::detection::domain::detection_session_config::DetectionSessionConfig;
    use crate::detection::infrastructure::simulated_face_engine::SimulatedFaceEngine;
    use crate::pipeline::pipeline_logger::SummaryPipelineLogger;
    use crate::scheduling::domain::clock::Clock;
    use crate::scheduling::infrastructure::manual_clock::ManualClock;
    use crate::scheduling::infrastructure::queued_frame_scheduler::QueuedFrameScheduler;
    use rstest::rstest;

    const REFRESH: Duration = Duration::from_micros(16_667);

    struct Fixture {
        clock: Rc<ManualClock>,
        scheduler: Rc<QueuedFrameScheduler>,
        camera: Rc<SyntheticCamera>,
        source: FrameSourceController,
        engine: SimulatedFaceEngine,
        adapter: FaceDetectionAdapter,
        logger: Rc<RefCell<SummaryPipelineLogger>>,
        limiter: DetectionRateLimiter,
    }

    fn fixture(engine_latency: u32) -> Fixture {
        build(engine_latency, false)
    }

    fn build(engine_latency: u32, fail_init: bool) -> Fixture {
        let clock = Rc::new(ManualClock::new());
        let scheduler = Rc::new(QueuedFrameScheduler::new(clock.clone()));
        let camera = Rc::new(SyntheticCamera::with_devices(
            scheduler.clone(),
            clock.clone(),
            vec![SyntheticDevice::new("cam", "Camera", FacingMode::Environment, 32, 18)],
        ));
        let source = FrameSourceController::new(camera.clone());
        let engine = SimulatedFaceEngine::new(scheduler.clone())
            .with_faces(SimulatedFaceEngine::demo_faces())
            .with_result_latency(engine_latency);
        let engine = if fail_init { engine.failing_init() } else { engine };
        let adapter =
            FaceDetectionAdapter::new(Box::new(engine.clone()), &DetectionSessionConfig::default());
        let logger = Rc::new(RefCell::new(SummaryPipelineLogger::new()));
        let limiter = DetectionRateLimiter::new(
            source.clone(),
            adapter.clone(),
            scheduler.clone(),
            logger.clone(),
            Duration::from_millis(100),
        );
        Fixture {
            clock,
            scheduler,
            camera,
            source,
            engine,
            adapter,
            logger,
            limiter,
        }
    }

    /// Acquires the camera, lets it warm up and brings the engine to ready.
    fn ready(f: &Fixture) {
        f.source
            .acquire(CaptureConstraints::default(), Box::new(|r| assert!(r.is_ok())));
        f.scheduler.run_frame();
        f.adapter.initialize();
        f.scheduler.run_frame();
        f.clock.advance(Duration::from_millis(60));
        assert_eq!(f.adapter.status(), EngineStatus::Ready);
    }

    fn run_frames(f: &Fixture, frames: usize) -> Vec<Duration> {
        let mut dispatch_times = Vec::new();
        for _ in 0..frames {
            f.scheduler.run_frame();
            if let Some(at) = f.limiter.last_dispatch() {
                if dispatch_times.last() != Some(&at) {
                    dispatch_times.push(at);
                }
            }
            f.clock.advance(REFRESH);
        }
        dispatch_times
    }

    #[rstest]
    #[case(Duration::from_millis(100), Duration::from_millis(99), false)]
    #[case(Duration::from_millis(100), Duration::from_millis(100), true)]
    #[case(Duration::from_millis(100), Duration::from_millis(250), true)]
    #[case(Duration::from_millis(33), Duration::from_millis(20), false)]
    fn test_try_dispatch_respects_interval(
        #[case] interval: Duration,
        #[case] elapsed: Duration,
        #[case] expected: bool,
    ) {
        let mut state = RateLimiterState::new(interval);
        let start = Duration::from_secs(3);
        assert!(state.try_dispatch(start));
        assert_eq!(state.try_dispatch(start + elapsed), expected);
    }

    #[test]
    fn test_first_dispatch_always_allowed() {
        let mut state = RateLimiterState::new(Duration::from_secs(10));
        assert!(state.try_dispatch(Duration::ZERO));
        assert_eq!(state.last_dispatch(), Some(Duration::ZERO));
    }

    #[test]
    fn test_rejected_dispatch_keeps_previous_time() {
        let mut state = RateLimiterState::new(Duration::from_millis(100));
        state.try_dispatch(Duration::from_millis(500));
        assert!(!state.try_dispatch(Duration::from_millis(550)));
        assert_eq!(state.last_dispatch(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_clock_going_backwards_is_throttled() {
        let mut state = RateLimiterState::new(Duration::from_millis(100));
        state.try_dispatch(Duration::from_millis(500));
        assert!(!state.try_dispatch(Duration::from_millis(100)));
    }

    #[test]
    fn test_reset_allows_immediate_dispatch() {
        let mut state = RateLimiterState::new(Duration::from_millis(100));
        state.try_dispatch(Duration::from_millis(500));
        state.reset();
        assert!(state.try_dispatch(Duration::from_millis(510)));
    }

    #[test]
    fn test_from_rate() {
        assert_eq!(RateLimiterState::from_rate(10.0).interval(), Duration::from_millis(100));
        assert_eq!(RateLimiterState::from_rate(4.0).interval(), Duration::from_millis(250));
    }

    #[rstest]
    #[case(1e-30, Duration::from_secs(100))]
    #[case(0.0, Duration::from_secs(100))]
    #[case(-3.0, Duration::from_secs(100))]
    #[case(f64::NAN, Duration::from_secs(100))]
    #[case(f64::INFINITY, Duration::from_millis(1))]
    fn test_from_rate_clamps_extremes(#[case] rate: f64, #[case] expected: Duration) {
        assert_eq!(RateLimiterState::from_rate(rate).interval(), expected);
    }

    #[test]
    fn test_at_most_ten_dispatches_per_second() {
        let f = fixture(1);
        ready(&f);
        f.limiter.start();

        let times = run_frames(&f, 60);

        assert!(times.len() <= 10, "{} dispatches", times.len());
        assert!(times.len() >= 9, "{} dispatches", times.len());
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(f.limiter.dispatches(), times.len() as u64);
    }

    #[test]
    fn test_dispatch_does_not_wait_for_results() {
        let f = fixture(40);
        ready(&f);
        f.limiter.start();

        run_frames(&f, 30);

        assert!(f.engine.submissions() >= 4);
        assert_eq!(f.adapter.results(), 0);
        assert_eq!(f.engine.in_flight() as u64, f.engine.submissions());
    }

    #[test]
    fn test_not_ready_does_not_consume_slot() {
        let f = fixture(1);
        f.source
            .acquire(CaptureConstraints::default(), Box::new(|r| assert!(r.is_ok())));
        f.scheduler.run_frame();

        assert_eq!(f.limiter.tick_once(f.clock.now()), DispatchOutcome::NotReady);
        assert_eq!(f.limiter.last_dispatch(), None);
        assert_eq!(f.logger.borrow().counter("detect.not_ready"), 1);
    }

    #[test]
    fn test_throttled_within_interval() {
        let f = fixture(1);
        ready(&f);
        let now = Duration::from_secs(1);

        assert!(matches!(f.limiter.tick_once(now), DispatchOutcome::Dispatched(_)));
        assert_eq!(
            f.limiter.tick_once(now + Duration::from_millis(40)),
            DispatchOutcome::Throttled
        );
        assert!(matches!(
            f.limiter.tick_once(now + Duration::from_millis(100)),
            DispatchOutcome::Dispatched(SubmitOutcome::Dispatched)
        ));
    }

    #[test]
    fn test_frames_before_engine_ready_are_deferred() {
        let f = fixture(1);
        f.source
            .acquire(CaptureConstraints::default(), Box::new(|r| assert!(r.is_ok())));
        f.scheduler.run_frame();
        f.clock.advance(Duration::from_millis(60));

        assert_eq!(
            f.limiter.tick_once(Duration::from_secs(1)),
            DispatchOutcome::Dispatched(SubmitOutcome::Deferred)
        );
        assert_eq!(f.logger.borrow().counter("detect.deferred"), 1);
    }

    #[test]
    fn test_loop_stops_when_source_released() {
        let f = fixture(1);
        ready(&f);
        f.limiter.start();
        run_frames(&f, 3);

        f.source.release();
        f.scheduler.run_frame();

        assert!(!f.limiter.is_running());
        assert!(!f.limiter.has_pending_tick());
    }

    #[test]
    fn test_loop_stops_when_device_disappears() {
        let f = fixture(1);
        ready(&f);
        f.limiter.start();
        run_frames(&f, 3);

        f.camera.disconnect(&DeviceId::new("cam"));
        f.scheduler.run_frame();

        assert!(!f.limiter.is_running());
        assert!(!f.limiter.has_pending_tick());
        assert!(!f.source.has_source());
    }

    #[test]
    fn test_failed_engine_ends_loop_without_counting_dispatches() {
        let f = build(1, true);
        f.source
            .acquire(CaptureConstraints::default(), Box::new(|r| assert!(r.is_ok())));
        f.scheduler.run_frame();
        f.clock.advance(Duration::from_millis(60));
        f.limiter.start();

        run_frames(&f, 5);

        assert_eq!(f.adapter.status(), EngineStatus::Failed);
        assert!(!f.limiter.is_running());
        assert!(!f.limiter.has_pending_tick());
        assert_eq!(f.limiter.dispatches(), 1);
        assert_eq!(f.logger.borrow().counter("detect.dropped"), 0);
        assert_eq!(f.logger.borrow().counter("detect.engine_unavailable"), 1);
    }

    #[test]
    fn test_shut_down_engine_is_not_dispatched_to() {
        let f = fixture(1);
        ready(&f);
        f.adapter.shutdown();

        assert_eq!(
            f.limiter.tick_once(Duration::from_secs(1)),
            DispatchOutcome::EngineUnavailable
        );
        assert_eq!(f.limiter.dispatches(), 0);
        assert_eq!(f.limiter.last_dispatch(), None);
    }

    #[test]
    fn test_stop_cancels_pending_tick() {
        let f = fixture(1);
        ready(&f);
        f.limiter.start();
        assert!(f.limiter.has_pending_tick());

        f.limiter.stop();
        let before = f.engine.submissions();
        run_frames(&f, 12);

        assert!(!f.limiter.has_pending_tick());
        assert_eq!(f.engine.submissions(), before);
    }

    #[test]
    fn test_start_is_idempotent() {
        let f = fixture(1);
        ready(&f);
        f.limiter.start();
        f.limiter.start();

        f.scheduler.run_frame();

        assert_eq!(f.limiter.dispatches(), 1);
    }

    #[test]
    fn test_set_interval_changes_rate() {
        let f = fixture(1);
        ready(&f);
        f.limiter.set_interval(Duration::from_millis(250));
        f.limiter.start();

        let times = run_frames(&f, 60);

        assert!(times.len() <= 4, "{} dispatches", times.len());
    }
}
