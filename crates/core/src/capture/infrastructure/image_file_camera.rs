use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_source::{
    AcquireCallback, CaptureConstraints, CaptureSource, DeviceSelector, MediaTrack, ReadyState,
    TrackSettings, VideoStream,
};
use crate::capture::domain::device_descriptor::{DeviceDescriptor, DeviceId};
use crate::scheduling::domain::frame_scheduler::FrameScheduler;
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::{Frame, SharedFrame};

/// Presents still images as cameras, one device per file.
///
/// Each acquisition decodes the file with the `image` crate and serves the
/// same frame for the lifetime of the stream. Results are delivered on the
/// next display refresh.
pub struct ImageFileCamera {
    scheduler: Rc<dyn FrameScheduler>,
    paths: Vec<PathBuf>,
}

impl ImageFileCamera {
    pub fn new(scheduler: Rc<dyn FrameScheduler>, paths: Vec<PathBuf>) -> Self {
        Self { scheduler, paths }
    }

    /// Whether `path` has an extension this camera can decode.
    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn resolve(&self, selector: &DeviceSelector) -> Result<PathBuf, CaptureError> {
        match selector {
            DeviceSelector::Exact(id) => self
                .paths
                .iter()
                .find(|p| device_id(p) == *id)
                .cloned()
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no image source {id}"))),
            DeviceSelector::Facing(_) => self
                .paths
                .first()
                .cloned()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no image sources".to_string())),
        }
    }
}

impl CaptureSource for ImageFileCamera {
    fn acquire_stream(&self, constraints: &CaptureConstraints, done: AcquireCallback) {
        let resolved = self.resolve(&constraints.selector);
        self.scheduler.schedule_next_frame(Box::new(move |_| {
            done(resolved.and_then(|path| open(&path)));
        }));
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        Ok(self
            .paths
            .iter()
            .map(|p| DeviceDescriptor::video(device_id(p).as_str(), file_label(p)))
            .collect())
    }
}

fn device_id(path: &Path) -> DeviceId {
    DeviceId::new(format!("file:{}", path.display()))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn open(path: &Path) -> Result<Box<dyn VideoStream>, CaptureError> {
    let img = image::open(path)
        .map_err(|e| CaptureError::Acquisition(format!("{}: {e}", path.display())))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    let frame = Arc::new(Frame::new(img.into_raw(), width, height, 3, 0));
    log::debug!("Opened image source {} ({width}x{height})", path.display());

    let track = ImageTrack {
        label: file_label(path),
        settings: TrackSettings {
            device_id: Some(device_id(path)),
            width: Some(width),
            height: Some(height),
            frame_rate: None,
            facing_mode: None,
        },
        live: true,
    };
    Ok(Box::new(ImageStream {
        tracks: vec![Box::new(track)],
        frame,
    }))
}

struct ImageTrack {
    label: String,
    settings: TrackSettings,
    live: bool,
}

impl MediaTrack for ImageTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

struct ImageStream {
    tracks: Vec<Box<dyn MediaTrack>>,
    frame: SharedFrame,
}

impl ImageStream {
    fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }
}

impl VideoStream for ImageStream {
    fn tracks(&self) -> &[Box<dyn MediaTrack>] {
        &self.tracks
    }

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>] {
        &mut self.tracks
    }

    fn ready_state(&self) -> ReadyState {
        if self.is_live() {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        }
    }

    fn current_frame(&self) -> Option<SharedFrame> {
        self.is_live().then(|| Arc::clone(&self.frame))
    }
}
