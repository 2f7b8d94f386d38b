use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

/// Cross-cutting logger for loop-level pipeline events.
///
/// The render and detection loops report what each tick did through this
/// trait so a host can observe them without the loops knowing where the
/// numbers end up.
pub trait PipelineLogger {
    /// Count one occurrence of a named event (e.g. `render.drawn`).
    fn count(&mut self, event: &str);

    /// Record how long a named stage took for one tick.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. faces per result).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Logger handle shared by every component of one pipeline.
pub type SharedLogger = Rc<RefCell<dyn PipelineLogger>>;

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl NullPipelineLogger {
    pub fn shared() -> SharedLogger {
        Rc::new(RefCell::new(NullPipelineLogger))
    }
}

impl PipelineLogger for NullPipelineLogger {
    fn count(&mut self, _event: &str) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Collects counters, timings and metrics and renders them as a report
/// when the run ends.
pub struct SummaryPipelineLogger {
    counters: HashMap<String, u64>,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    messages: Vec<String>,
}

impl SummaryPipelineLogger {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            messages: Vec::new(),
        }
    }

    pub fn counter(&self, event: &str) -> u64 {
        self.counters.get(event).copied().unwrap_or(0)
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Returns the formatted summary string, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.counters.is_empty() && self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!("Pipeline summary ({elapsed:.1}s wall clock):")];

        let mut events: Vec<_> = self.counters.iter().collect();
        events.sort();
        for (event, count) in events {
            lines.push(format!("  {event:20}: {count}"));
        }

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            lines.push(format!(
                "  {stage:20}: avg {:6.2}ms  total {total_ms:7.0}ms",
                average(durations)
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            lines.push(format!("  {name}: avg {:.1}", average(&self.metrics[name])));
        }

        Some(lines.join("\n"))
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Default for SummaryPipelineLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineLogger for SummaryPipelineLogger {
    fn count(&mut self, event: &str) {
        *self.counters.entry(event.to_string()).or_default() += 1;
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
