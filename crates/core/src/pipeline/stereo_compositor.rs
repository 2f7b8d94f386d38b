use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::compositing::domain::render_surface::{RenderSurface, Rgba};
use crate::compositing::domain::stereo_layout::StereoGeometry;
use crate::pipeline::frame_source_controller::{FrameAvailability, FrameSourceController};
use crate::pipeline::pipeline_logger::SharedLogger;
use crate::scheduling::domain::frame_scheduler::{FrameScheduler, TickHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source has not buffered a paintable frame yet.
    NotReady,
    /// The container had no size this tick.
    ResizeRace,
    /// The frame reported zero width or height.
    EmptyFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Drawn(StereoGeometry),
    /// Surface left untouched; the loop keeps going.
    Skipped(SkipReason),
    /// No source any more; the loop ends.
    Stopped,
}

/// Display-refresh loop painting the current frame once per eye.
///
/// Each tick recomputes the layout from the container size and the frame's
/// aspect ratio, clears the surface, draws the frame into both halves and
/// paints the divider. The pending tick is kept so `stop` can cancel it.
#[derive(Clone)]
pub struct StereoCompositor {
    inner: Rc<CompositorInner>,
}

struct CompositorInner {
    source: FrameSourceController,
    surface: RefCell<Box<dyn RenderSurface>>,
    scheduler: Rc<dyn FrameScheduler>,
    logger: SharedLogger,
    state: RefCell<LoopState>,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    pending: Option<TickHandle>,
    frames_drawn: u64,
    ticks_skipped: u64,
}

impl StereoCompositor {
    pub fn new(
        source: FrameSourceController,
        surface: Box<dyn RenderSurface>,
        scheduler: Rc<dyn FrameScheduler>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            inner: Rc::new(CompositorInner {
                source,
                surface: RefCell::new(surface),
                scheduler,
                logger,
                state: RefCell::new(LoopState::default()),
            }),
        }
    }

    /// Starts the loop. Calling it while running has no effect.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.running {
                return;
            }
            state.running = true;
        }
        log::info!("Stereo render loop started");
        self.schedule_tick();
    }

    /// Stops the loop and cancels the pending tick, if any.
    pub fn stop(&self) {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            let was_running = state.running;
            state.running = false;
            if was_running {
                log::info!("Stereo render loop stopped");
            }
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

    pub fn frames_drawn(&self) -> u64 {
        self.inner.state.borrow().frames_drawn
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.inner.state.borrow().ticks_skipped
    }

    fn schedule_tick(&self) {
        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_next_frame(Box::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                StereoCompositor { inner }.on_tick();
            }
        }));
        self.inner.state.borrow_mut().pending = Some(handle);
    }

    fn on_tick(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.pending = None;
            if !state.running {
                return;
            }
        }
        match self.render_once() {
            RenderOutcome::Stopped => {
                self.inner.state.borrow_mut().running = false;
                log::info!("Video source gone, stereo render loop stopped");
            }
            _ => self.schedule_tick(),
        }
    }

    /// Paints one tick against whatever frame is current right now.
    pub fn render_once(&self) -> RenderOutcome {
        let started = Instant::now();
        let outcome = self.paint();
        let mut logger = self.inner.logger.borrow_mut();
        let mut state = self.inner.state.borrow_mut();
        match &outcome {
            RenderOutcome::Drawn(_) => {
                state.frames_drawn += 1;
                logger.count("render.drawn");
                logger.timing("render", started.elapsed().as_secs_f64() * 1000.0);
            }
            RenderOutcome::Skipped(reason) => {
                state.ticks_skipped += 1;
                logger.count(match reason {
                    SkipReason::NotReady => "render.not_ready",
                    SkipReason::ResizeRace => "render.resize_race",
                    SkipReason::EmptyFrame => "render.empty_frame",
                });
                log::trace!("Render tick skipped: {reason:?}");
            }
            RenderOutcome::Stopped => logger.count("render.stopped"),
        }
        outcome
    }

    fn paint(&self) -> RenderOutcome {
        let frame = match self.inner.source.frame_availability() {
            FrameAvailability::NoSource | FrameAvailability::Gone => return RenderOutcome::Stopped,
            FrameAvailability::NotReady => return RenderOutcome::Skipped(SkipReason::NotReady),
            FrameAvailability::Ready(frame) => frame,
        };

        let mut surface = self.inner.surface.borrow_mut();
        let Some((width, height)) = surface.container_size().filter(|&(w, h)| w > 0 && h > 0)
        else {
            return RenderOutcome::Skipped(SkipReason::ResizeRace);
        };
        let Some(geometry) = StereoGeometry::compute(frame.width(), frame.height(), width, height)
        else {
            return RenderOutcome::Skipped(SkipReason::EmptyFrame);
        };

        surface.set_size(width, height);
        surface.clear(Rgba::BACKGROUND);
        surface.draw_region(&frame, geometry.left_draw, geometry.left_viewport);
        surface.draw_region(&frame, geometry.right_draw, geometry.right_viewport);
        surface.fill_rect(Rgba::DIVIDER, geometry.divider);
        RenderOutcome::Drawn(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::capture_source::{CaptureConstraints, FacingMode};
    use crate::capture::domain::device_descriptor::DeviceId;
    use crate::capture::infrastructure::synthetic_camera::{SyntheticCamera, SyntheticDevice};
    use crate::compositing::infrastructure::cpu_canvas::CpuCanvas;
    use crate::pipeline::pipeline_logger::SummaryPipelineLogger;
    use crate::scheduling::infrastructure::manual_clock::ManualClock;
    use crate::scheduling::infrastructure::queued_frame_scheduler::QueuedFrameScheduler;
    use std::time::Duration;

    struct Fixture {
        clock: Rc<ManualClock>,
        scheduler: Rc<QueuedFrameScheduler>,
        camera: Rc<SyntheticCamera>,
        source: FrameSourceController,
        canvas: CpuCanvas,
        logger: Rc<RefCell<SummaryPipelineLogger>>,
        compositor: StereoCompositor,
    }

    fn fixture() -> Fixture {
        let clock = Rc::new(ManualClock::new());
        let scheduler = Rc::new(QueuedFrameScheduler::new(clock.clone()));
        let camera = Rc::new(SyntheticCamera::with_devices(
            scheduler.clone(),
            clock.clone(),
            vec![SyntheticDevice::new("cam", "Camera", FacingMode::Environment, 32, 18)],
        ));
        let source = FrameSourceController::new(camera.clone());
        let canvas = CpuCanvas::new(40, 20);
        let logger = Rc::new(RefCell::new(SummaryPipelineLogger::new()));
        let compositor = StereoCompositor::new(
            source.clone(),
            Box::new(canvas.clone()),
            scheduler.clone(),
            logger.clone(),
        );
        Fixture {
            clock,
            scheduler,
            camera,
            source,
            canvas,
            logger,
            compositor,
        }
    }

    fn acquire(f: &Fixture) {
        f.source
            .acquire(CaptureConstraints::default(), Box::new(|r| assert!(r.is_ok())));
        f.scheduler.run_frame();
    }

    fn warm_up(f: &Fixture) {
        f.clock.advance(Duration::from_millis(60));
    }

    #[test]
    fn test_both_eyes_show_identical_image() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);

        let RenderOutcome::Drawn(g) = f.compositor.render_once() else {
            panic!("expected a drawn tick");
        };
        assert_eq!(f.canvas.size(), (40, 20));

        // Compare only columns that fall inside both viewports.
        let offset = (g.right_draw.x - g.left_draw.x) as u32;
        let first = g.right_viewport.x.ceil() as u32 - offset;
        let end = g.left_viewport.width.floor() as u32;
        assert_eq!((offset, first, end), (20, 1, 19));
        for y in [0, 7, 19] {
            for x in first..end {
                assert_eq!(f.canvas.pixel(x, y), f.canvas.pixel(x + offset, y), "at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_divider_painted_over_background() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.compositor.render_once();

        let expected = Rgba::DIVIDER.blend_over([11, 12, 15]);
        assert_eq!(f.canvas.pixel(19, 5), Some(expected));
        assert_eq!(f.canvas.pixel(20, 5), Some(expected));
        assert_ne!(f.canvas.pixel(18, 5), Some(expected));
    }

    #[test]
    fn test_not_ready_leaves_surface_untouched() {
        let f = fixture();
        acquire(&f);

        assert_eq!(
            f.compositor.render_once(),
            RenderOutcome::Skipped(SkipReason::NotReady)
        );
        assert_eq!(f.canvas.size(), (0, 0));
        assert_eq!(f.logger.borrow().counter("render.not_ready"), 1);
    }

    #[test]
    fn test_missing_container_skips_tick() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.canvas.detach_container();

        assert_eq!(
            f.compositor.render_once(),
            RenderOutcome::Skipped(SkipReason::ResizeRace)
        );
    }

    #[test]
    fn test_surface_follows_container_resize() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.compositor.render_once();

        f.canvas.resize_container(64, 24);
        match f.compositor.render_once() {
            RenderOutcome::Drawn(geometry) => {
                assert_eq!((geometry.surface_width, geometry.surface_height), (64, 24));
            }
            other => panic!("expected a drawn tick, got {other:?}"),
        }
        assert_eq!(f.canvas.size(), (64, 24));
    }

    #[test]
    fn test_loop_reschedules_through_not_ready_ticks() {
        let f = fixture();
        acquire(&f);
        f.compositor.start();

        f.scheduler.run_frame();
        assert_eq!(f.compositor.ticks_skipped(), 1);
        assert!(f.compositor.has_pending_tick());

        warm_up(&f);
        f.scheduler.run_frame();
        f.scheduler.run_frame();
        assert_eq!(f.compositor.frames_drawn(), 2);
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn test_start_twice_keeps_single_tick() {
        let f = fixture();
        acquire(&f);
        f.compositor.start();
        f.compositor.start();
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn test_stop_cancels_pending_tick() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.compositor.start();
        f.compositor.stop();

        assert_eq!(f.scheduler.pending(), 0);
        assert!(!f.compositor.is_running());
        f.scheduler.run_frame();
        assert_eq!(f.compositor.frames_drawn(), 0);
    }

    #[test]
    fn test_loop_ends_when_source_released() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.compositor.start();
        f.scheduler.run_frame();

        f.source.release();
        f.scheduler.run_frame();
        assert!(!f.compositor.is_running());
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.logger.borrow().counter("render.stopped"), 1);
    }

    #[test]
    fn test_loop_ends_when_device_disappears() {
        let f = fixture();
        acquire(&f);
        warm_up(&f);
        f.compositor.start();
        f.scheduler.run_frame();
        assert_eq!(f.compositor.frames_drawn(), 1);

        f.camera.disconnect(&DeviceId::new("cam"));
        f.scheduler.run_frame();
        assert!(!f.compositor.is_running());
        assert!(!f.source.has_source());
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.compositor.frames_drawn(), 1);
        assert_eq!(f.logger.borrow().counter("render.stopped"), 1);
    }

    #[test]
    fn test_dropped_compositor_tick_is_harmless() {
        let f = fixture();
        acquire(&f);
        f.compositor.start();
        let Fixture {
            scheduler,
            compositor,
            ..
        } = f;
        drop(compositor);
        assert_eq!(scheduler.run_frame(), 1);
        assert_eq!(scheduler.pending(), 0);
    }
}
