use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::detection::domain::detection_session_config::ModelVariant;
use crate::detection::domain::engine_error::EngineError;
use crate::detection::domain::inference_engine::{
    EngineOptions, InferenceEngine, InitCallback, RawDetectionBatch, ResultCallback,
};
use crate::detection::infrastructure::blazeface_decoder;
use crate::detection::infrastructure::model_resolver;
use crate::scheduling::domain::frame_scheduler::{FrameScheduler, TickHandle};
use crate::shared::constants::DEFAULT_MIN_CONFIDENCE;
use crate::shared::frame::{Frame, SharedFrame};

/// Where model files come from.
#[derive(Debug, Clone, Default)]
pub struct ModelSource {
    pub model_dir: Option<PathBuf>,
    pub base_url: Option<String>,
}

enum Job {
    Configure(EngineOptions),
    Detect(SharedFrame),
}

enum Event {
    Ready(Result<(), String>),
    Detections(RawDetectionBatch),
    Failed(String),
}

struct Worker {
    jobs: Sender<Job>,
    events: Receiver<Event>,
}

/// BlazeFace running on ONNX Runtime in a background thread.
///
/// Frames cross to the worker over a channel; results come back over another
/// and are drained by a display-refresh pump, so callbacks always run on the
/// scheduler's thread. At most one frame is in flight: frames submitted
/// while the worker is busy are dropped.
pub struct OnnxBlazefaceEngine {
    scheduler: Rc<dyn FrameScheduler>,
    source: ModelSource,
    inner: Rc<RefCell<OnnxState>>,
}

struct OnnxState {
    worker: Option<Worker>,
    ready: bool,
    busy: bool,
    options: EngineOptions,
    pending_init: Option<InitCallback>,
    callback: Option<ResultCallback>,
    pump: Option<TickHandle>,
    dropped_frames: u64,
}

impl OnnxBlazefaceEngine {
    pub fn new(scheduler: Rc<dyn FrameScheduler>, source: ModelSource) -> Self {
        Self {
            scheduler,
            source,
            inner: Rc::new(RefCell::new(OnnxState {
                worker: None,
                ready: false,
                busy: false,
                options: EngineOptions {
                    model_variant: ModelVariant::ShortRange,
                    min_confidence: DEFAULT_MIN_CONFIDENCE,
                },
                pending_init: None,
                callback: None,
                pump: None,
                dropped_frames: 0,
            })),
        }
    }

    /// Frames discarded because the worker was still busy.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.borrow().dropped_frames
    }

    fn ensure_pump(&self) {
        ensure_pump(&self.inner, &self.scheduler);
    }
}

fn ensure_pump(inner: &Rc<RefCell<OnnxState>>, scheduler: &Rc<dyn FrameScheduler>) {
    let mut state = inner.borrow_mut();
    let outstanding = state.pending_init.is_some() || state.busy;
    if state.pump.is_some() || state.worker.is_none() || !outstanding {
        return;
    }
    let weak = Rc::downgrade(inner);
    let next = Rc::clone(scheduler);
    state.pump = Some(scheduler.schedule_next_frame(Box::new(move |_| pump(&weak, &next))));
}

fn pump(weak: &Weak<RefCell<OnnxState>>, scheduler: &Rc<dyn FrameScheduler>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    inner.borrow_mut().pump = None;

    loop {
        let received = match inner.borrow().worker.as_ref() {
            Some(worker) => worker.events.try_recv(),
            None => return,
        };
        match received {
            Ok(Event::Ready(result)) => {
                let done = {
                    let mut state = inner.borrow_mut();
                    state.ready = result.is_ok();
                    state.pending_init.take()
                };
                if let Some(done) = done {
                    done(result.map_err(EngineError::InitFailure));
                }
            }
            Ok(Event::Detections(batch)) => {
                let callback = {
                    let mut state = inner.borrow_mut();
                    state.busy = false;
                    state.callback.take()
                };
                if let Some(mut callback) = callback {
                    callback(batch);
                    let mut state = inner.borrow_mut();
                    if state.callback.is_none() {
                        state.callback = Some(callback);
                    }
                }
            }
            Ok(Event::Failed(message)) => {
                log::warn!("BlazeFace inference failed: {message}");
                inner.borrow_mut().busy = false;
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                let done = {
                    let mut state = inner.borrow_mut();
                    state.worker = None;
                    state.ready = false;
                    state.busy = false;
                    state.pending_init.take()
                };
                if let Some(done) = done {
                    done(Err(EngineError::InitFailure(
                        "inference worker exited".to_string(),
                    )));
                }
                return;
            }
        }
    }
    ensure_pump(&inner, scheduler);
}

impl InferenceEngine for OnnxBlazefaceEngine {
    fn initialize(&mut self, done: InitCallback) {
        self.shutdown();

        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let options = self.inner.borrow().options;
        let source = self.source.clone();
        let failure_tx = event_tx.clone();

        let spawned = std::thread::Builder::new()
            .name("blazeface-worker".to_string())
            .spawn(move || worker_loop(source, options, job_rx, event_tx));
        if let Err(e) = spawned {
            let _ = failure_tx.send(Event::Ready(Err(format!(
                "failed to start inference worker: {e}"
            ))));
        }

        {
            let mut state = self.inner.borrow_mut();
            state.worker = Some(Worker {
                jobs: job_tx,
                events: event_rx,
            });
            state.pending_init = Some(done);
        }
        self.ensure_pump();
    }

    fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        let mut state = self.inner.borrow_mut();
        state.options = *options;
        if let Some(worker) = &state.worker {
            worker
                .jobs
                .send(Job::Configure(*options))
                .map_err(|_| EngineError::ShutDown)?;
        }
        Ok(())
    }

    fn register_result_callback(&mut self, callback: ResultCallback) {
        self.inner.borrow_mut().callback = Some(callback);
    }

    fn submit(&mut self, frame: SharedFrame) -> Result<(), EngineError> {
        {
            let mut state = self.inner.borrow_mut();
            if !state.ready {
                return Err(EngineError::SubmitFailure(
                    "engine not initialized".to_string(),
                ));
            }
            if state.busy {
                state.dropped_frames += 1;
                log::trace!("BlazeFace busy, dropping frame {}", frame.sequence());
                return Ok(());
            }
            let worker = state.worker.as_ref().ok_or(EngineError::ShutDown)?;
            worker
                .jobs
                .send(Job::Detect(frame))
                .map_err(|_| EngineError::SubmitFailure("inference worker exited".to_string()))?;
            state.busy = true;
        }
        self.ensure_pump();
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.inner.borrow_mut();
        // Dropping the job sender ends the worker after its current frame.
        state.worker = None;
        state.ready = false;
        state.busy = false;
        state.pending_init = None;
        if let Some(handle) = state.pump.take() {
            self.scheduler.cancel(handle);
        }
    }
}

/// Model session plus the anchors it was built for.
struct LoadedModel {
    session: ort::session::Session,
    variant: ModelVariant,
    anchors: Vec<[f32; 2]>,
}

impl LoadedModel {
    fn load(source: &ModelSource, variant: ModelVariant) -> Result<Self, Box<dyn std::error::Error>> {
        let path = model_resolver::resolve(
            model_resolver::model_file_name(variant),
            source.model_dir.as_deref(),
            source.base_url.as_deref(),
        )?;
        let session = ort::session::Session::builder()?.commit_from_file(&path)?;
        log::info!("Loaded BlazeFace {variant} model from {}", path.display());
        Ok(Self {
            session,
            variant,
            anchors: blazeface_decoder::generate_anchors(variant),
        })
    }

    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<RawDetectionBatch, Box<dyn std::error::Error>> {
        let size = blazeface_decoder::input_size(self.variant);
        let input = ort::value::Tensor::from_array(blazeface_decoder::preprocess(frame, size))?;
        let outputs = self.session.run(ort::inputs![input])?;

        // regressors: [1, anchors, 16], classificators: [1, anchors, 1]
        if outputs.len() < 2 {
            return Err(format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into());
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("Cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("Cannot get score slice")?;

        Ok(RawDetectionBatch {
            detections: blazeface_decoder::decode(
                reg_data,
                score_data,
                &self.anchors,
                size,
                min_confidence,
            ),
            frame_sequence: frame.sequence(),
        })
    }
}

fn worker_loop(
    source: ModelSource,
    mut options: EngineOptions,
    jobs: Receiver<Job>,
    events: Sender<Event>,
) {
    let mut model = match LoadedModel::load(&source, options.model_variant) {
        Ok(model) => {
            let _ = events.send(Event::Ready(Ok(())));
            model
        }
        Err(e) => {
            let _ = events.send(Event::Ready(Err(e.to_string())));
            return;
        }
    };

    for job in jobs {
        match job {
            Job::Configure(next) => {
                if next.model_variant != model.variant {
                    match LoadedModel::load(&source, next.model_variant) {
                        Ok(reloaded) => model = reloaded,
                        Err(e) => log::warn!("Keeping {} model: {e}", model.variant),
                    }
                }
                options = next;
            }
            Job::Detect(frame) => {
                let event = match model.detect(&frame, options.min_confidence) {
                    Ok(batch) => Event::Detections(batch),
                    Err(e) => Event::Failed(e.to_string()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }
    log::debug!("BlazeFace worker exiting");
}
