use std::path::Path;

use thiserror::Error;

use crate::compositing::infrastructure::cpu_canvas::CpuCanvas;
use crate::shared::frame::Frame;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("surface has no pixels to export")]
    EmptySurface,
    #[error("frame buffer does not match {width}x{height}")]
    InvalidBuffer { width: u32, height: u32 },
    #[error("failed to prepare output directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Exports composited stereo frames to image files using the `image` crate.
///
/// The format follows the file extension. An optional size produces a
/// downscaled preview.
pub struct SnapshotWriter {
    size: Option<(u32, u32)>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self { size: None }
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: Some((width, height)),
        }
    }

    pub fn write(&self, canvas: &CpuCanvas, path: &Path) -> Result<(), SnapshotError> {
        self.write_frame(&canvas.to_frame(), path)
    }

    pub fn write_frame(&self, frame: &Frame, path: &Path) -> Result<(), SnapshotError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(SnapshotError::EmptySurface);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let rgb: Vec<u8> = frame
            .data()
            .chunks_exact(frame.channels() as usize)
            .flat_map(|px| px[..3].iter().copied())
            .collect();
        let img = image::RgbImage::from_raw(frame.width(), frame.height(), rgb).ok_or(
            SnapshotError::InvalidBuffer {
                width: frame.width(),
                height: frame.height(),
            },
        )?;

        let img = match self.size {
            Some((w, h)) => image::imageops::resize(&img, w, h, image::imageops::FilterType::Triangle),
            None => img,
        };

        img.save(path)?;
        log::info!("Saved snapshot to {}", path.display());
        Ok(())
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}
