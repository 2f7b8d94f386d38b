use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::scheduling::domain::clock::Clock;
use crate::scheduling::domain::frame_scheduler::{FrameCallback, FrameScheduler, TickHandle};

/// Host-driven display refresh queue.
///
/// The host calls [`run_frame`](Self::run_frame) once per refresh. Each call
/// runs exactly the callbacks that were scheduled before it started;
/// callbacks scheduled while a frame is running wait for the next one, so a
/// self-rescheduling loop advances at most one step per refresh.
pub struct QueuedFrameScheduler {
    clock: Rc<dyn Clock>,
    state: RefCell<QueueState>,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    queued: VecDeque<(TickHandle, FrameCallback)>,
    running: VecDeque<(TickHandle, FrameCallback)>,
    frames_run: u64,
}

impl QueuedFrameScheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RefCell::new(QueueState::default()),
        }
    }

    /// Runs one display refresh and returns how many callbacks fired.
    pub fn run_frame(&self) -> usize {
        let now = self.clock.now();
        {
            let mut state = self.state.borrow_mut();
            let batch = std::mem::take(&mut state.queued);
            state.running.extend(batch);
            state.frames_run += 1;
        }

        let mut fired = 0;
        loop {
            // The borrow is released before the callback runs so it can
            // schedule or cancel freely.
            let next = self.state.borrow_mut().running.pop_front();
            let Some((_, callback)) = next else {
                break;
            };
            callback(now);
            fired += 1;
        }
        fired
    }

    /// Number of callbacks still waiting to run.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        state.queued.len() + state.running.len()
    }

    pub fn frames_run(&self) -> u64 {
        self.state.borrow().frames_run
    }
}

impl FrameScheduler for QueuedFrameScheduler {
    fn schedule_next_frame(&self, callback: FrameCallback) -> TickHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let handle = TickHandle::new(state.next_id);
        state.queued.push_back((handle, callback));
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        let mut state = self.state.borrow_mut();
        state.queued.retain(|(h, _)| *h != handle);
        state.running.retain(|(h, _)| *h != handle);
    }
}
