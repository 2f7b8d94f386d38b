mod settings;

use std::cell::RefCell;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use stereocam_core::capture::domain::capture_error::CaptureError;
use stereocam_core::capture::domain::capture_source::{
    CaptureConstraints, CaptureSource, FacingMode, ResolutionHint,
};
use stereocam_core::capture::domain::device_descriptor::DeviceId;
use stereocam_core::capture::infrastructure::image_file_camera::ImageFileCamera;
use stereocam_core::capture::infrastructure::synthetic_camera::SyntheticCamera;
use stereocam_core::compositing::infrastructure::cpu_canvas::CpuCanvas;
use stereocam_core::compositing::infrastructure::snapshot_writer::SnapshotWriter;
use stereocam_core::detection::domain::detection_session_config::ModelVariant;
use stereocam_core::detection::domain::detection_snapshot::DetectionSnapshot;
use stereocam_core::detection::domain::inference_engine::InferenceEngine;
use stereocam_core::detection::infrastructure::simulated_face_engine::SimulatedFaceEngine;
use stereocam_core::pipeline::frame_source_controller::{AcquireDone, AcquiredSource};
use stereocam_core::pipeline::pipeline_config::PipelineConfig;
use stereocam_core::pipeline::pipeline_logger::{PipelineLogger, SummaryPipelineLogger};
use stereocam_core::pipeline::stereo_pipeline::{DetectionStats, PipelineDeps, StereoPipeline};
use stereocam_core::scheduling::domain::clock::Clock;
use stereocam_core::scheduling::domain::frame_scheduler::FrameScheduler;
use stereocam_core::scheduling::infrastructure::manual_clock::ManualClock;
use stereocam_core::scheduling::infrastructure::monotonic_clock::MonotonicClock;
use stereocam_core::scheduling::infrastructure::queued_frame_scheduler::QueuedFrameScheduler;

use settings::{EngineKind, Settings};

/// Accepted range for the simulated display refresh rate.
const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Facing {
    Environment,
    User,
}

impl From<Facing> for FacingMode {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::Environment => FacingMode::Environment,
            Facing::User => FacingMode::User,
        }
    }
}

/// Headless stereo camera pipeline: side-by-side rendering plus throttled
/// face detection.
#[derive(Parser)]
#[command(name = "stereocam")]
struct Cli {
    /// Still images to serve as cameras instead of the synthetic devices.
    images: Vec<PathBuf>,

    /// Camera device id to open (overrides --facing).
    #[arg(long)]
    device: Option<String>,

    /// Camera facing used when no device id is given.
    #[arg(long, value_enum, default_value = "environment")]
    facing: Facing,

    /// Ideal capture width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Ideal capture height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Width of the stereo output surface.
    #[arg(long, default_value = "1280")]
    canvas_width: u32,

    /// Height of the stereo output surface.
    #[arg(long, default_value = "360")]
    canvas_height: u32,

    /// Display refreshes to run before exiting.
    #[arg(long, default_value = "120")]
    frames: usize,

    /// Simulated display refresh rate.
    #[arg(long, default_value = "60")]
    fps: f64,

    /// Pace refreshes against the wall clock instead of simulated time.
    #[arg(long)]
    realtime: bool,

    /// Enable face detection.
    #[arg(long)]
    detect: bool,

    /// Target detection dispatches per second.
    #[arg(long)]
    detection_rate: Option<f64>,

    /// Maximum faces reported per result.
    #[arg(long)]
    max_faces: Option<usize>,

    /// Minimum detection confidence (0.0-1.0).
    #[arg(long)]
    confidence: Option<f32>,

    /// Detection model: short or full.
    #[arg(long)]
    model: Option<ModelVariant>,

    /// Inference engine.
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Directory holding BlazeFace ONNX models.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Base URL models are downloaded from when missing.
    #[arg(long)]
    model_url: Option<String>,

    /// Switch to this device halfway through the run.
    #[arg(long)]
    switch_to: Option<String>,

    /// Write the last stereo frame to this image file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the available cameras after acquisition.
    #[arg(long)]
    list_devices: bool,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,

    /// Persist the effective settings as the new defaults.
    #[arg(long)]
    save_settings: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    frames: usize,
    frames_drawn: u64,
    ticks_skipped: u64,
    active_device: Option<String>,
    detection: DetectionStats,
    latest: &'a DetectionSnapshot,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = effective_settings(&cli, Settings::load());
    validate(&cli, &settings)?;
    if cli.save_settings {
        settings.save();
    }

    let manual_clock = (!cli.realtime).then(|| Rc::new(ManualClock::new()));
    let clock: Rc<dyn Clock> = match &manual_clock {
        Some(clock) => clock.clone(),
        None => Rc::new(MonotonicClock::new()),
    };
    let scheduler = Rc::new(QueuedFrameScheduler::new(clock.clone()));
    let capture = build_capture(&cli, scheduler.clone(), clock.clone());
    let engine = build_engine(&cli, settings.engine, scheduler.clone())?;
    let canvas = CpuCanvas::new(cli.canvas_width, cli.canvas_height);
    let logger = Rc::new(RefCell::new(SummaryPipelineLogger::new()));

    let resolution = ResolutionHint {
        ideal_width: settings.width,
        ideal_height: settings.height,
    };
    let config = PipelineConfig {
        preferred_resolution: resolution,
        ..PipelineConfig::default()
    }
    .with_detection_rate(settings.detection_rate)?
    .with_detection_enabled(settings.detection_enabled)
    .with_session(settings.detection.clone());

    let pipeline = StereoPipeline::new(
        PipelineDeps {
            capture,
            surface: Box::new(canvas.clone()),
            engine,
            scheduler: scheduler.clone(),
            clock,
            logger: logger.clone(),
        },
        config,
    )?;

    let failure: Rc<RefCell<Option<CaptureError>>> = Rc::new(RefCell::new(None));
    let lost = failure.clone();
    pipeline.register_source_lost_callback(Box::new(move |e: CaptureError| *lost.borrow_mut() = Some(e)));
    let constraints = match &settings.preferred_device {
        Some(id) => CaptureConstraints::device(DeviceId::new(id.as_str()), resolution),
        None => CaptureConstraints::facing(cli.facing.into(), resolution),
    };
    pipeline.start(constraints, report_acquisition(failure.clone()));

    let frame_time = Duration::from_secs_f64(1.0 / cli.fps);
    for frame in 0..cli.frames {
        scheduler.run_frame();
        if let Some(e) = failure.borrow_mut().take() {
            return Err(e.into());
        }
        if frame == cli.frames / 2 {
            if let Some(id) = &cli.switch_to {
                log::info!("Switching to {id}");
                pipeline.switch_to(DeviceId::new(id.as_str()), report_acquisition(failure.clone()));
            }
        }
        match &manual_clock {
            Some(clock) => clock.advance(frame_time),
            None => std::thread::sleep(frame_time),
        }
    }

    if cli.list_devices {
        for (index, device) in pipeline.devices().iter().enumerate() {
            println!("{index}: {} ({})", device.display_label(index), device.id);
        }
    }

    let latest = pipeline.latest_detections();
    let report = RunReport {
        frames: cli.frames,
        frames_drawn: pipeline.compositor().frames_drawn(),
        ticks_skipped: pipeline.compositor().ticks_skipped(),
        active_device: pipeline.active_device_id().map(|id| id.to_string()),
        detection: pipeline.detection_stats(),
        latest: &latest,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(path) = &cli.snapshot {
        SnapshotWriter::new().write(&canvas, path)?;
        log::info!("Stereo frame written to {}", path.display());
    }

    pipeline.stop();
    logger.borrow().summary();
    Ok(())
}

fn report_acquisition(failure: Rc<RefCell<Option<CaptureError>>>) -> AcquireDone {
    Box::new(move |result: Result<AcquiredSource, CaptureError>| match result {
        Ok(source) => log::info!("Camera ready: {} ({})", source.label, source.device_id),
        Err(CaptureError::Superseded) => log::debug!("Acquisition superseded"),
        Err(e) => *failure.borrow_mut() = Some(e),
    })
}

/// Settings file values with command-line flags applied on top.
fn effective_settings(cli: &Cli, mut settings: Settings) -> Settings {
    if let Some(device) = &cli.device {
        settings.preferred_device = Some(device.clone());
    }
    if let Some(width) = cli.width {
        settings.width = width;
    }
    if let Some(height) = cli.height {
        settings.height = height;
    }
    if cli.detect {
        settings.detection_enabled = true;
    }
    if let Some(rate) = cli.detection_rate {
        settings.detection_rate = rate;
    }
    if let Some(max_faces) = cli.max_faces {
        settings.detection.max_faces = max_faces;
    }
    if let Some(confidence) = cli.confidence {
        settings.detection.min_confidence = confidence;
    }
    if let Some(model) = cli.model {
        settings.detection.model_variant = model;
    }
    if let Some(engine) = cli.engine {
        settings.engine = engine;
    }
    settings
}

fn validate(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if !(MIN_FPS..=MAX_FPS).contains(&cli.fps) {
        return Err(format!("FPS must be between {MIN_FPS} and {MAX_FPS}, got {}", cli.fps).into());
    }
    if cli.canvas_width == 0 || cli.canvas_height == 0 {
        return Err("Canvas dimensions must be non-zero".into());
    }
    for image in &cli.images {
        if !image.exists() {
            return Err(format!("Input file not found: {}", image.display()).into());
        }
        if !ImageFileCamera::is_supported(image) {
            return Err(format!("Unsupported image format: {}", image.display()).into());
        }
    }
    settings.detection.validate()?;
    Ok(())
}

fn build_capture(
    cli: &Cli,
    scheduler: Rc<dyn FrameScheduler>,
    clock: Rc<dyn Clock>,
) -> Rc<dyn CaptureSource> {
    if cli.images.is_empty() {
        Rc::new(SyntheticCamera::new(scheduler, clock))
    } else {
        Rc::new(ImageFileCamera::new(scheduler, cli.images.clone()))
    }
}

fn build_engine(
    cli: &Cli,
    kind: EngineKind,
    scheduler: Rc<dyn FrameScheduler>,
) -> Result<Box<dyn InferenceEngine>, Box<dyn std::error::Error>> {
    match kind {
        EngineKind::Simulated => Ok(Box::new(
            SimulatedFaceEngine::new(scheduler)
                .with_faces(SimulatedFaceEngine::demo_faces())
                .with_init_latency(10)
                .with_result_latency(3),
        )),
        EngineKind::Onnx => build_onnx_engine(cli, scheduler),
    }
}

#[cfg(feature = "onnx")]
fn build_onnx_engine(
    cli: &Cli,
    scheduler: Rc<dyn FrameScheduler>,
) -> Result<Box<dyn InferenceEngine>, Box<dyn std::error::Error>> {
    use stereocam_core::detection::infrastructure::onnx_blazeface_engine::{
        ModelSource, OnnxBlazefaceEngine,
    };
    let source = ModelSource {
        model_dir: cli.model_dir.clone(),
        base_url: cli.model_url.clone(),
    };
    Ok(Box::new(OnnxBlazefaceEngine::new(scheduler, source)))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx_engine(
    _cli: &Cli,
    _scheduler: Rc<dyn FrameScheduler>,
) -> Result<Box<dyn InferenceEngine>, Box<dyn std::error::Error>> {
    Err("The onnx engine requires building with --features onnx".into())
}

fn print_report(report: &RunReport<'_>) {
    println!(
        "Rendered {} of {} refreshes ({} skipped)",
        report.frames_drawn, report.frames, report.ticks_skipped
    );
    if let Some(device) = &report.active_device {
        println!("Active camera: {device}");
    }
    let stats = &report.detection;
    if let Some(error) = &stats.last_error {
        println!("Face detection {:?}: {error}", stats.status);
    }
    if !stats.running && stats.results_received == 0 {
        println!("Face detection: off");
        return;
    }
    println!(
        "Face detection: {} dispatches, {} results, {:.1} results/s",
        stats.dispatches, stats.results_received, report.latest.results_per_second
    );
    for face in &report.latest.faces {
        let b = &face.bounding_box;
        println!(
            "  {}: ({:.3}, {:.3}) {:.3}x{:.3} confidence {:.2}",
            face.id, b.x, b.y, b.width, b.height, face.confidence
        );
    }
}
