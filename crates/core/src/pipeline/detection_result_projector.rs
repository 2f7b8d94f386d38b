use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::detection::domain::detection_snapshot::DetectionSnapshot;
use crate::detection::domain::face_record::FaceRecord;
use crate::detection::domain::inference_engine::RawDetectionBatch;
use crate::pipeline::pipeline_logger::SharedLogger;
use crate::scheduling::domain::clock::Clock;

/// Snapshots buffered per subscriber before newer ones are skipped for it.
const SUBSCRIBER_CAPACITY: usize = 64;

/// Latest published snapshot plus the subscribers that receive each new one.
///
/// Snapshots are immutable `Arc`s, so a consumer sees either the previous
/// snapshot or the next one, never a mix.
#[derive(Clone)]
pub struct DetectionFeed {
    inner: Rc<RefCell<FeedState>>,
}

struct FeedState {
    latest: Arc<DetectionSnapshot>,
    subscribers: Vec<Sender<Arc<DetectionSnapshot>>>,
}

impl DetectionFeed {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(FeedState {
                latest: Arc::new(DetectionSnapshot::default()),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Replaces the latest snapshot and fans it out. Subscribers whose
    /// receiver was dropped are forgotten.
    pub fn publish(&self, snapshot: Arc<DetectionSnapshot>) {
        let mut state = self.inner.borrow_mut();
        state.subscribers.retain(|tx| match tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Detection subscriber lagging, skipped snapshot {}", snapshot.sequence);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        state.latest = snapshot;
    }

    /// Receiver for every snapshot published from now on.
    pub fn subscribe(&self) -> Receiver<Arc<DetectionSnapshot>> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        self.inner.borrow_mut().subscribers.push(tx);
        rx
    }

    pub fn latest(&self) -> Arc<DetectionSnapshot> {
        Arc::clone(&self.inner.borrow().latest)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

impl Default for DetectionFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns raw engine batches into published [`DetectionSnapshot`]s.
#[derive(Clone)]
pub struct DetectionResultProjector {
    clock: Rc<dyn Clock>,
    logger: SharedLogger,
    state: Rc<RefCell<ProjectorState>>,
    feed: DetectionFeed,
}

struct ProjectorState {
    last_result: Option<Duration>,
    last_rate: f64,
    sequence: u64,
    max_faces: usize,
    results: u64,
}

impl DetectionResultProjector {
    pub fn new(clock: Rc<dyn Clock>, logger: SharedLogger, max_faces: usize) -> Self {
        Self {
            clock,
            logger,
            state: Rc::new(RefCell::new(ProjectorState {
                last_result: None,
                last_rate: 0.0,
                sequence: 0,
                max_faces,
                results: 0,
            })),
            feed: DetectionFeed::new(),
        }
    }

    /// Normalizes one batch and publishes it as the latest snapshot.
    ///
    /// The rate is the inverse of the time since the previous callback, so
    /// it reflects engine latency rather than the dispatch rate. The first
    /// result after a clear reports 0.
    ///
    /// Batches are taken in arrival order: a batch for an older frame that
    /// arrives last still becomes the latest snapshot.
    pub fn project(&self, batch: RawDetectionBatch) -> Arc<DetectionSnapshot> {
        let now = self.clock.now();
        let snapshot = {
            let mut state = self.state.borrow_mut();
            let rate = match state.last_result {
                None => 0.0,
                Some(previous) => {
                    let elapsed = now.saturating_sub(previous).as_secs_f64();
                    if elapsed > 0.0 {
                        1.0 / elapsed
                    } else {
                        state.last_rate
                    }
                }
            };
            state.last_result = Some(now);
            state.last_rate = rate;
            state.sequence += 1;
            state.results += 1;

            let faces: Vec<FaceRecord> = batch
                .detections
                .iter()
                .take(state.max_faces)
                .enumerate()
                .map(|(index, raw)| FaceRecord::from_raw(index, raw))
                .collect();

            Arc::new(DetectionSnapshot {
                faces,
                results_per_second: rate,
                timestamp: now,
                sequence: state.sequence,
                frame_sequence: batch.frame_sequence,
            })
        };

        {
            let mut logger = self.logger.borrow_mut();
            logger.count("detect.result");
            logger.metric("detect.faces", snapshot.face_count() as f64);
            if snapshot.results_per_second > 0.0 {
                logger.metric("detect.results_per_second", snapshot.results_per_second);
            }
        }
        log::trace!(
            "Frame {}: {} faces ({} raw), {:.1} results/s",
            batch.frame_sequence,
            snapshot.face_count(),
            batch.detections.len(),
            snapshot.results_per_second
        );

        self.feed.publish(Arc::clone(&snapshot));
        snapshot
    }

    /// Publishes an empty snapshot and restarts the rate estimate.
    pub fn clear(&self) {
        let now = self.clock.now();
        let snapshot = {
            let mut state = self.state.borrow_mut();
            state.last_result = None;
            state.last_rate = 0.0;
            state.sequence += 1;
            DetectionSnapshot::cleared(now, state.sequence)
        };
        self.feed.publish(Arc::new(snapshot));
    }

    pub fn set_max_faces(&self, max_faces: usize) {
        self.state.borrow_mut().max_faces = max_faces;
    }

    pub fn max_faces(&self) -> usize {
        self.state.borrow().max_faces
    }

    /// Batches projected since creation.
    pub fn results(&self) -> u64 {
        self.state.borrow().results
    }

    pub fn latest(&self) -> Arc<DetectionSnapshot> {
        self.feed.latest()
    }

    pub fn subscribe(&self) -> Receiver<Arc<DetectionSnapshot>> {
        self.feed.subscribe()
    }

    pub fn feed(&self) -> &DetectionFeed {
        &self.feed
    }
}
