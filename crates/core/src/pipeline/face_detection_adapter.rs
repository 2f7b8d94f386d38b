use std::cell::RefCell;
use std::rc::Rc;

use crate::detection::domain::detection_session_config::DetectionSessionConfig;
use crate::detection::domain::engine_error::EngineError;
use crate::detection::domain::inference_engine::{
    EngineOptions, InferenceEngine, RawDetectionBatch, ResultCallback,
};
use serde::Serialize;

use crate::shared::frame::SharedFrame;

/// Told about every engine error the adapter observes.
pub type ErrorCallback = Box<dyn FnMut(&EngineError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
    /// Initialization failed; detection stays off until `reset`.
    Failed,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to the engine.
    Dispatched,
    /// Held until initialization finishes; a later frame replaces it.
    Deferred,
    /// The engine is failed or shut down.
    Dropped,
    /// The engine rejected the frame.
    Failed,
}

/// Wraps the inference engine behind a non-blocking submit.
///
/// Initializes the engine on demand with at most one initialization in
/// flight, keeps the newest frame submitted meanwhile, and applies the
/// session configuration whenever the engine becomes ready. Results are
/// forwarded only while the engine is ready.
#[derive(Clone)]
pub struct FaceDetectionAdapter {
    inner: Rc<AdapterInner>,
}

struct AdapterInner {
    engine: RefCell<Box<dyn InferenceEngine>>,
    state: RefCell<AdapterState>,
    sink: RefCell<Option<ResultCallback>>,
    on_error: RefCell<Option<ErrorCallback>>,
}

struct AdapterState {
    status: EngineStatus,
    /// Bumped on shutdown so a late initialization callback is ignored.
    epoch: u64,
    options: EngineOptions,
    options_dirty: bool,
    deferred: Option<SharedFrame>,
    submitted: u64,
    results: u64,
    failures: u64,
    last_error: Option<String>,
}

impl FaceDetectionAdapter {
    pub fn new(engine: Box<dyn InferenceEngine>, config: &DetectionSessionConfig) -> Self {
        let inner = Rc::new(AdapterInner {
            engine: RefCell::new(engine),
            state: RefCell::new(AdapterState {
                status: EngineStatus::Uninitialized,
                epoch: 0,
                options: config.engine_options(),
                options_dirty: true,
                deferred: None,
                submitted: 0,
                results: 0,
                failures: 0,
                last_error: None,
            }),
            sink: RefCell::new(None),
            on_error: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        inner
            .engine
            .borrow_mut()
            .register_result_callback(Box::new(move |batch| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(batch);
                }
            }));

        Self { inner }
    }

    /// Sets where raw result batches go. Replaces any earlier callback.
    pub fn register_result_callback(&self, callback: ResultCallback) {
        *self.inner.sink.borrow_mut() = Some(callback);
    }

    /// Sets the callback for initialization and submit errors. Replaces any
    /// earlier callback.
    pub fn register_error_callback(&self, callback: ErrorCallback) {
        *self.inner.on_error.borrow_mut() = Some(callback);
    }

    /// Starts engine initialization unless it is already under way, done,
    /// or shut down.
    pub fn initialize(&self) {
        let epoch = {
            let mut state = self.inner.state.borrow_mut();
            if !matches!(state.status, EngineStatus::Uninitialized | EngineStatus::Failed) {
                return;
            }
            state.status = EngineStatus::Initializing;
            state.epoch
        };
        log::info!("Initializing face detection engine");

        let weak = Rc::downgrade(&self.inner);
        self.inner
            .engine
            .borrow_mut()
            .initialize(Box::new(move |result| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish_init(epoch, result);
                }
            }));
        // Covers engines that completed synchronously above.
        self.inner.flush();
    }

    /// Validates and stores a new session config. Takes effect immediately
    /// when the engine is ready, otherwise as soon as it becomes ready.
    pub fn configure(&self, config: &DetectionSessionConfig) -> Result<(), EngineError> {
        config.validate()?;
        {
            let mut state = self.inner.state.borrow_mut();
            state.options = config.engine_options();
            state.options_dirty = true;
        }
        self.inner.flush();
        Ok(())
    }

    /// Fire-and-forget submission; never waits for a result.
    pub fn submit(&self, frame: SharedFrame) -> SubmitOutcome {
        let status = self.inner.state.borrow().status;
        match status {
            EngineStatus::Failed | EngineStatus::ShutDown => SubmitOutcome::Dropped,
            EngineStatus::Uninitialized => {
                self.inner.state.borrow_mut().deferred = Some(frame);
                self.initialize();
                SubmitOutcome::Deferred
            }
            EngineStatus::Initializing => {
                log::trace!("Engine initializing, deferring frame {}", frame.sequence());
                self.inner.state.borrow_mut().deferred = Some(frame);
                SubmitOutcome::Deferred
            }
            EngineStatus::Ready => {
                let result = self.inner.engine.borrow_mut().submit(frame);
                if self.inner.record_submit(result) {
                    SubmitOutcome::Dispatched
                } else {
                    SubmitOutcome::Failed
                }
            }
        }
    }

    /// Releases engine resources. Safe before `initialize` and idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.status == EngineStatus::ShutDown {
                return;
            }
            state.status = EngineStatus::ShutDown;
            state.epoch += 1;
            state.deferred = None;
        }
        self.inner.engine.borrow_mut().shutdown();
        log::info!("Face detection engine shut down");
    }

    /// Makes a shut-down or failed adapter usable again and forgets the
    /// last error.
    pub fn reset(&self) {
        let mut state = self.inner.state.borrow_mut();
        if matches!(state.status, EngineStatus::ShutDown | EngineStatus::Failed) {
            state.status = EngineStatus::Uninitialized;
            state.options_dirty = true;
            state.last_error = None;
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.inner.state.borrow().status
    }

    pub fn options(&self) -> EngineOptions {
        self.inner.state.borrow().options
    }

    /// Frames accepted by the engine.
    pub fn submitted(&self) -> u64 {
        self.inner.state.borrow().submitted
    }

    /// Result batches forwarded to the callback.
    pub fn results(&self) -> u64 {
        self.inner.state.borrow().results
    }

    pub fn failures(&self) -> u64 {
        self.inner.state.borrow().failures
    }

    /// Message of the most recent initialization or submit error.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.borrow().last_error.clone()
    }
}

impl AdapterInner {
    fn finish_init(&self, epoch: u64, result: Result<(), EngineError>) {
        let failure = {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch || state.status != EngineStatus::Initializing {
                log::debug!("Ignoring stale engine initialization");
                return;
            }
            match result {
                Ok(()) => {
                    state.status = EngineStatus::Ready;
                    state.options_dirty = true;
                    state.last_error = None;
                    log::info!("Face detection engine ready");
                    None
                }
                Err(e) => {
                    state.status = EngineStatus::Failed;
                    state.deferred = None;
                    state.last_error = Some(e.to_string());
                    log::warn!("Face detection unavailable: {e}");
                    Some(e)
                }
            }
        };
        match failure {
            Some(e) => self.report(&e),
            None => self.flush(),
        }
    }

    /// Counts a submit result and reports a failure. True when accepted.
    fn record_submit(&self, result: Result<(), EngineError>) -> bool {
        let error = {
            let mut state = self.state.borrow_mut();
            match result {
                Ok(()) => {
                    state.submitted += 1;
                    return true;
                }
                Err(e) => {
                    state.failures += 1;
                    state.last_error = Some(e.to_string());
                    log::warn!("Face detection submit failed: {e}");
                    e
                }
            }
        };
        self.report(&error);
        false
    }

    fn report(&self, error: &EngineError) {
        let callback = self.on_error.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback(error);
            let mut slot = self.on_error.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    /// Pushes pending configuration and the deferred frame into a ready
    /// engine. A no-op while the engine is borrowed further up the stack.
    fn flush(&self) {
        let Ok(mut engine) = self.engine.try_borrow_mut() else {
            return;
        };
        let (options, frame) = {
            let mut state = self.state.borrow_mut();
            if state.status != EngineStatus::Ready {
                return;
            }
            let options = state.options_dirty.then_some(state.options);
            state.options_dirty = false;
            (options, state.deferred.take())
        };

        if let Some(options) = options {
            if let Err(e) = engine.configure(&options) {
                log::warn!("Engine rejected configuration: {e}");
            }
        }
        if let Some(frame) = frame {
            let result = engine.submit(frame);
            drop(engine);
            self.record_submit(result);
        }
    }

    fn deliver(&self, batch: RawDetectionBatch) {
        {
            let mut state = self.state.borrow_mut();
            if state.status != EngineStatus::Ready {
                log::trace!("Dropping detection result while {:?}", state.status);
                return;
            }
            state.results += 1;
        }
        let callback = self.sink.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback(batch);
            let mut sink = self.sink.borrow_mut();
            if sink.is_none() {
                *sink = Some(callback);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detection_session_config::ModelVariant;
    use crate::detection::domain::inference_engine::InitCallback;
    use crate::shared::frame::Frame;
    use std::sync::Arc;

    #[derive(Default)]
    struct ManualEngineState {
        sync_init: bool,
        fail_submits: bool,
        init_callbacks: Vec<InitCallback>,
        submitted: Vec<u64>,
        configured: Vec<EngineOptions>,
        callback: Option<ResultCallback>,
        shutdowns: u32,
    }

    /// Engine double whose callbacks the test fires by hand.
    #[derive(Clone, Default)]
    struct ManualEngine {
        state: Rc<RefCell<ManualEngineState>>,
    }

    impl ManualEngine {
        fn complete_init(&self, index: usize, result: Result<(), EngineError>) {
            let done = self.state.borrow_mut().init_callbacks.remove(index);
            done(result);
        }

        fn emit(&self, frame_sequence: u64) {
            let callback = self.state.borrow_mut().callback.take();
            let mut callback = callback.expect("result callback registered");
            callback(RawDetectionBatch {
                detections: Vec::new(),
                frame_sequence,
            });
            self.state.borrow_mut().callback = Some(callback);
        }
    }

    impl InferenceEngine for ManualEngine {
        fn initialize(&mut self, done: InitCallback) {
            if self.state.borrow().sync_init {
                done(Ok(()));
            } else {
                self.state.borrow_mut().init_callbacks.push(done);
            }
        }

        fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
            self.state.borrow_mut().configured.push(*options);
            Ok(())
        }

        fn register_result_callback(&mut self, callback: ResultCallback) {
            self.state.borrow_mut().callback = Some(callback);
        }

        fn submit(&mut self, frame: SharedFrame) -> Result<(), EngineError> {
            let mut state = self.state.borrow_mut();
            if state.fail_submits {
                return Err(EngineError::SubmitFailure("busy".to_string()));
            }
            state.submitted.push(frame.sequence());
            Ok(())
        }

        fn shutdown(&mut self) {
            self.state.borrow_mut().shutdowns += 1;
        }
    }

    fn frame(sequence: u64) -> SharedFrame {
        Arc::new(Frame::solid(2, 2, [0, 0, 0], sequence))
    }

    fn setup() -> (ManualEngine, FaceDetectionAdapter) {
        let engine = ManualEngine::default();
        let adapter =
            FaceDetectionAdapter::new(Box::new(engine.clone()), &DetectionSessionConfig::default());
        (engine, adapter)
    }

    fn collect(adapter: &FaceDetectionAdapter) -> Rc<RefCell<Vec<u64>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        adapter.register_result_callback(Box::new(move |b| sink.borrow_mut().push(b.frame_sequence)));
        seen
    }

    #[test]
    fn test_submit_before_init_defers_latest_frame_and_inits_once() {
        let (engine, adapter) = setup();

        assert_eq!(adapter.submit(frame(1)), SubmitOutcome::Deferred);
        assert_eq!(adapter.submit(frame(2)), SubmitOutcome::Deferred);
        assert_eq!(adapter.status(), EngineStatus::Initializing);
        assert_eq!(engine.state.borrow().init_callbacks.len(), 1);

        engine.complete_init(0, Ok(()));
        assert_eq!(adapter.status(), EngineStatus::Ready);
        assert_eq!(engine.state.borrow().submitted, vec![2]);
        assert_eq!(adapter.submitted(), 1);
    }

    #[test]
    fn test_initialize_is_single_flight() {
        let (engine, adapter) = setup();
        adapter.initialize();
        adapter.initialize();
        assert_eq!(engine.state.borrow().init_callbacks.len(), 1);
    }

    #[test]
    fn test_synchronous_init_still_flushes() {
        let (engine, adapter) = setup();
        engine.state.borrow_mut().sync_init = true;

        adapter.submit(frame(7));
        assert_eq!(adapter.status(), EngineStatus::Ready);
        assert_eq!(engine.state.borrow().submitted, vec![7]);
        assert_eq!(engine.state.borrow().configured.len(), 1);
    }

    #[test]
    fn test_config_applied_when_engine_becomes_ready() {
        let (engine, adapter) = setup();
        let config = DetectionSessionConfig {
            min_confidence: 0.8,
            model_variant: ModelVariant::FullRange,
            ..Default::default()
        };
        adapter.configure(&config).unwrap();
        assert!(engine.state.borrow().configured.is_empty());

        adapter.initialize();
        engine.complete_init(0, Ok(()));
        let configured = engine.state.borrow().configured.clone();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].min_confidence, 0.8);
        assert_eq!(configured[0].model_variant, ModelVariant::FullRange);
    }

    #[test]
    fn test_configure_repeatedly_while_ready() {
        let (engine, adapter) = setup();
        adapter.initialize();
        engine.complete_init(0, Ok(()));

        for confidence in [0.3, 0.6, 0.9] {
            let config = DetectionSessionConfig {
                min_confidence: confidence,
                ..Default::default()
            };
            adapter.configure(&config).unwrap();
        }
        let configured = engine.state.borrow().configured.clone();
        assert_eq!(configured.len(), 4);
        assert_eq!(configured[3].min_confidence, 0.9);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (_engine, adapter) = setup();
        let config = DetectionSessionConfig {
            min_confidence: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            adapter.configure(&config),
            Err(EngineError::Configure(_))
        ));
        assert_eq!(adapter.options().min_confidence, 0.5);
    }

    #[test]
    fn test_init_failure_disables_detection_until_reset() {
        let (engine, adapter) = setup();
        adapter.submit(frame(1));
        engine.complete_init(0, Err(EngineError::InitFailure("no model".to_string())));

        assert_eq!(adapter.status(), EngineStatus::Failed);
        assert_eq!(adapter.submit(frame(2)), SubmitOutcome::Dropped);
        assert!(engine.state.borrow().submitted.is_empty());

        adapter.reset();
        assert_eq!(adapter.status(), EngineStatus::Uninitialized);
    }

    #[test]
    fn test_init_failure_is_kept_and_reported() {
        let (engine, adapter) = setup();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        adapter.register_error_callback(Box::new(move |e: &EngineError| sink.borrow_mut().push(e.to_string())));

        adapter.initialize();
        assert_eq!(adapter.last_error(), None);
        engine.complete_init(0, Err(EngineError::InitFailure("no model".to_string())));

        let message = adapter.last_error().unwrap();
        assert!(message.contains("no model"), "{message}");
        assert_eq!(*errors.borrow(), vec![message]);

        adapter.reset();
        assert_eq!(adapter.last_error(), None);
    }

    #[test]
    fn test_submit_failure_sets_last_error() {
        let (engine, adapter) = setup();
        adapter.initialize();
        engine.complete_init(0, Ok(()));
        engine.state.borrow_mut().fail_submits = true;

        adapter.submit(frame(1));
        assert!(adapter.last_error().unwrap().contains("busy"));
        assert_eq!(adapter.status(), EngineStatus::Ready);
    }

    #[test]
    fn test_submit_failure_is_isolated() {
        let (engine, adapter) = setup();
        adapter.initialize();
        engine.complete_init(0, Ok(()));

        engine.state.borrow_mut().fail_submits = true;
        assert_eq!(adapter.submit(frame(1)), SubmitOutcome::Failed);
        engine.state.borrow_mut().fail_submits = false;
        assert_eq!(adapter.submit(frame(2)), SubmitOutcome::Dispatched);
        assert_eq!(adapter.failures(), 1);
        assert_eq!(adapter.submitted(), 1);
    }

    #[test]
    fn test_results_forwarded_only_while_ready() {
        let (engine, adapter) = setup();
        let seen = collect(&adapter);
        adapter.initialize();
        engine.emit(1);
        engine.complete_init(0, Ok(()));
        engine.emit(2);
        adapter.shutdown();
        engine.emit(3);

        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(adapter.results(), 1);
    }

    #[test]
    fn test_results_forwarded_in_arrival_order() {
        let (engine, adapter) = setup();
        let seen = collect(&adapter);
        adapter.initialize();
        engine.complete_init(0, Ok(()));

        engine.emit(3);
        engine.emit(2);
        assert_eq!(*seen.borrow(), vec![3, 2]);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_safe_before_start() {
        let (engine, adapter) = setup();
        adapter.shutdown();
        adapter.shutdown();
        assert_eq!(engine.state.borrow().shutdowns, 1);
        assert_eq!(adapter.status(), EngineStatus::ShutDown);
        assert_eq!(adapter.submit(frame(1)), SubmitOutcome::Dropped);
    }

    #[test]
    fn test_stale_init_after_shutdown_is_ignored() {
        let (engine, adapter) = setup();
        adapter.initialize();
        adapter.shutdown();
        adapter.reset();
        adapter.initialize();
        assert_eq!(engine.state.borrow().init_callbacks.len(), 2);

        engine.complete_init(0, Ok(()));
        assert_eq!(adapter.status(), EngineStatus::Initializing);
        engine.complete_init(0, Ok(()));
        assert_eq!(adapter.status(), EngineStatus::Ready);
    }

    #[test]
    fn test_init_completing_after_shutdown_keeps_adapter_down() {
        let (engine, adapter) = setup();
        adapter.submit(frame(1));
        adapter.shutdown();
        engine.complete_init(0, Ok(()));

        assert_eq!(adapter.status(), EngineStatus::ShutDown);
        assert!(engine.state.borrow().submitted.is_empty());
    }
}
