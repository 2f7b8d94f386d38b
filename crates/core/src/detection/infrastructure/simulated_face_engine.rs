use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::detection::domain::engine_error::EngineError;
use crate::detection::domain::inference_engine::{
    EngineOptions, InferenceEngine, InitCallback, Keypoint, RawBoundingBox, RawDetection,
    RawDetectionBatch, ResultCallback,
};
use crate::scheduling::domain::frame_scheduler::{FrameScheduler, TickHandle};
use crate::shared::frame::SharedFrame;

/// Deterministic stand-in for a real face detector.
///
/// Every submitted frame yields the scripted faces whose score clears the
/// configured minimum confidence. Initialization and results are delivered
/// from a display-refresh pump a configurable number of frames later; the
/// pump is only scheduled while work is outstanding. Cloning gives another
/// handle onto the same engine, which tests use to observe it.
#[derive(Clone)]
pub struct SimulatedFaceEngine {
    inner: Rc<RefCell<SimState>>,
    scheduler: Rc<dyn FrameScheduler>,
}

struct SimState {
    faces: Vec<RawDetection>,
    init_latency: u32,
    result_latency: u32,
    fail_init: bool,
    fail_every: Option<u64>,
    initialized: bool,
    options: Option<EngineOptions>,
    pending_init: Option<(u32, InitCallback)>,
    in_flight: VecDeque<(u32, RawDetectionBatch)>,
    callback: Option<ResultCallback>,
    pump: Option<TickHandle>,
    submissions: u64,
    init_calls: u64,
    shutdowns: u64,
}

impl SimulatedFaceEngine {
    pub fn new(scheduler: Rc<dyn FrameScheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimState {
                faces: Vec::new(),
                init_latency: 1,
                result_latency: 1,
                fail_init: false,
                fail_every: None,
                initialized: false,
                options: None,
                pending_init: None,
                in_flight: VecDeque::new(),
                callback: None,
                pump: None,
                submissions: 0,
                init_calls: 0,
                shutdowns: 0,
            })),
            scheduler,
        }
    }

    pub fn with_faces(self, faces: Vec<RawDetection>) -> Self {
        self.inner.borrow_mut().faces = faces;
        self
    }

    /// Frames between `initialize` and its completion (minimum 1).
    pub fn with_init_latency(self, frames: u32) -> Self {
        self.inner.borrow_mut().init_latency = frames.max(1);
        self
    }

    /// Frames between `submit` and the matching result (minimum 1).
    pub fn with_result_latency(self, frames: u32) -> Self {
        self.inner.borrow_mut().result_latency = frames.max(1);
        self
    }

    pub fn failing_init(self) -> Self {
        self.inner.borrow_mut().fail_init = true;
        self
    }

    /// Every `n`-th submission is rejected.
    pub fn failing_every(self, n: u64) -> Self {
        self.inner.borrow_mut().fail_every = Some(n.max(1));
        self
    }

    pub fn set_faces(&self, faces: Vec<RawDetection>) {
        self.inner.borrow_mut().faces = faces;
    }

    /// A pair of faces roughly where a person would sit in front of the lens.
    pub fn demo_faces() -> Vec<RawDetection> {
        vec![
            scripted_face(0.30, 0.25, 0.18, 0.32, 0.94),
            scripted_face(0.62, 0.30, 0.12, 0.22, 0.71),
        ]
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.borrow().initialized
    }

    pub fn submissions(&self) -> u64 {
        self.inner.borrow().submissions
    }

    pub fn init_calls(&self) -> u64 {
        self.inner.borrow().init_calls
    }

    pub fn shutdowns(&self) -> u64 {
        self.inner.borrow().shutdowns
    }

    pub fn in_flight(&self) -> usize {
        self.inner.borrow().in_flight.len()
    }

    pub fn options(&self) -> Option<EngineOptions> {
        self.inner.borrow().options
    }

    fn ensure_pump(&self) {
        ensure_pump(&self.inner, &self.scheduler);
    }
}

/// A face centred in a box of the given size, with six keypoints.
fn scripted_face(x: f32, y: f32, width: f32, height: f32, score: f32) -> RawDetection {
    let point = |dx: f32, dy: f32| Keypoint {
        x: x + width * dx,
        y: y + height * dy,
    };
    RawDetection {
        bounding_box: RawBoundingBox {
            x_min: x,
            y_min: y,
            width,
            height,
        },
        scores: vec![score],
        landmarks: Some(vec![
            point(0.3, 0.35),
            point(0.7, 0.35),
            point(0.5, 0.55),
            point(0.5, 0.75),
            point(0.0, 0.4),
            point(1.0, 0.4),
        ]),
    }
}

fn ensure_pump(inner: &Rc<RefCell<SimState>>, scheduler: &Rc<dyn FrameScheduler>) {
    let mut state = inner.borrow_mut();
    if state.pump.is_some() || (state.pending_init.is_none() && state.in_flight.is_empty()) {
        return;
    }
    let weak = Rc::downgrade(inner);
    let next = Rc::clone(scheduler);
    state.pump = Some(scheduler.schedule_next_frame(Box::new(move |_| pump(&weak, &next))));
}

/// One display refresh: age outstanding work and deliver whatever is due.
fn pump(weak: &Weak<RefCell<SimState>>, scheduler: &Rc<dyn FrameScheduler>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    let (init_done, due) = {
        let mut state = inner.borrow_mut();
        state.pump = None;

        let mut init_done = None;
        if let Some((remaining, done)) = state.pending_init.take() {
            if remaining <= 1 {
                let result = if state.fail_init {
                    Err(EngineError::InitFailure("simulated model load failure".to_string()))
                } else {
                    state.initialized = true;
                    Ok(())
                };
                init_done = Some((done, result));
            } else {
                state.pending_init = Some((remaining - 1, done));
            }
        }

        let mut due = Vec::new();
        let mut waiting = VecDeque::new();
        while let Some((remaining, batch)) = state.in_flight.pop_front() {
            if remaining <= 1 {
                due.push(batch);
            } else {
                waiting.push_back((remaining - 1, batch));
            }
        }
        state.in_flight = waiting;
        (init_done, due)
    };

    if let Some((done, result)) = init_done {
        done(result);
    }
    for batch in due {
        deliver(&inner, batch);
    }
    ensure_pump(&inner, scheduler);
}

fn deliver(inner: &Rc<RefCell<SimState>>, batch: RawDetectionBatch) {
    let callback = inner.borrow_mut().callback.take();
    if let Some(mut callback) = callback {
        callback(batch);
        let mut state = inner.borrow_mut();
        if state.callback.is_none() {
            state.callback = Some(callback);
        }
    }
}

impl InferenceEngine for SimulatedFaceEngine {
    fn initialize(&mut self, done: InitCallback) {
        {
            let mut state = self.inner.borrow_mut();
            state.init_calls += 1;
            let latency = state.init_latency;
            state.pending_init = Some((latency, done));
        }
        self.ensure_pump();
    }

    fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        self.inner.borrow_mut().options = Some(*options);
        Ok(())
    }

    fn register_result_callback(&mut self, callback: ResultCallback) {
        self.inner.borrow_mut().callback = Some(callback);
    }

    fn submit(&mut self, frame: SharedFrame) -> Result<(), EngineError> {
        {
            let mut state = self.inner.borrow_mut();
            if !state.initialized {
                return Err(EngineError::SubmitFailure("engine not initialized".to_string()));
            }
            state.submissions += 1;
            if let Some(n) = state.fail_every {
                if state.submissions % n == 0 {
                    return Err(EngineError::SubmitFailure(format!(
                        "simulated failure on submission {}",
                        state.submissions
                    )));
                }
            }

            let min_confidence = state.options.map(|o| o.min_confidence).unwrap_or(0.0);
            let detections = state
                .faces
                .iter()
                .filter(|f| f.scores.first().copied().unwrap_or(0.0) >= min_confidence)
                .cloned()
                .collect();
            let latency = state.result_latency;
            state.in_flight.push_back((
                latency,
                RawDetectionBatch {
                    detections,
                    frame_sequence: frame.sequence(),
                },
            ));
        }
        self.ensure_pump();
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.inner.borrow_mut();
        state.shutdowns += 1;
        state.initialized = false;
        state.pending_init = None;
        state.in_flight.clear();
        if let Some(handle) = state.pump.take() {
            self.scheduler.cancel(handle);
        }
    }
}
