use crate::compositing::domain::render_surface::Rect;
use crate::shared::constants::DIVIDER_WIDTH;

/// Per-tick layout of a side-by-side stereo surface.
///
/// Recomputed from scratch on every render tick. The two viewports and the
/// divider tile the surface exactly; the draw rectangles may overhang their
/// viewport and are clipped to it when painted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGeometry {
    pub surface_width: u32,
    pub surface_height: u32,
    pub left_viewport: Rect,
    pub right_viewport: Rect,
    pub divider: Rect,
    pub left_draw: Rect,
    pub right_draw: Rect,
}

impl StereoGeometry {
    /// Returns `None` when either the frame or the surface has no area.
    pub fn compute(
        frame_width: u32,
        frame_height: u32,
        surface_width: u32,
        surface_height: u32,
    ) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 || surface_width == 0 || surface_height == 0 {
            return None;
        }
        let w = surface_width as f64;
        let h = surface_height as f64;
        let half = w / 2.0;
        let aspect = frame_width as f64 / frame_height as f64;

        let fit = aspect_fit(aspect, half, h);
        let gap = DIVIDER_WIDTH / 2.0;

        Some(Self {
            surface_width,
            surface_height,
            left_viewport: Rect::new(0.0, 0.0, half - gap, h),
            right_viewport: Rect::new(half + gap, 0.0, w - half - gap, h),
            divider: Rect::new(half - gap, 0.0, DIVIDER_WIDTH, h),
            left_draw: fit,
            right_draw: Rect::new(half + fit.x, fit.y, fit.width, fit.height),
        })
    }
}

/// Fits a frame of the given aspect ratio into a `width` x `height` box.
///
/// A frame wider than the box fills its height and is centred horizontally
/// (overhanging both sides); otherwise it fills the width and is centred
/// vertically.
pub fn aspect_fit(aspect: f64, width: f64, height: f64) -> Rect {
    if aspect > width / height {
        let draw_width = height * aspect;
        Rect::new((width - draw_width) / 2.0, 0.0, draw_width, height)
    } else {
        let draw_height = width / aspect;
        Rect::new(0.0, (height - draw_height) / 2.0, width, draw_height)
    }
}
