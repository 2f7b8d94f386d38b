use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use ndarray::{s, Array3};

use crate::compositing::domain::render_surface::{Rect, RenderSurface, Rgba};
use crate::shared::frame::Frame;

/// Software render surface backed by an RGB ndarray.
///
/// Cloning yields another handle onto the same pixels, so a host can keep
/// one handle for inspection or export while the compositor owns another.
/// Scaling is nearest-neighbour.
#[derive(Clone)]
pub struct CpuCanvas {
    inner: Rc<RefCell<CanvasState>>,
}

struct CanvasState {
    container: Option<(u32, u32)>,
    pixels: Array3<u8>,
}

impl CpuCanvas {
    /// Creates a canvas hosted in a container of the given size. The backing
    /// store starts empty until the first `set_size`.
    pub fn new(container_width: u32, container_height: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CanvasState {
                container: Some((container_width, container_height)),
                pixels: Array3::zeros((0, 0, 3)),
            })),
        }
    }

    pub fn resize_container(&self, width: u32, height: u32) {
        self.inner.borrow_mut().container = Some((width, height));
    }

    /// Simulates the host element being detached mid-layout.
    pub fn detach_container(&self) {
        self.inner.borrow_mut().container = None;
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let state = self.inner.borrow();
        let (x, y) = (x as usize, y as usize);
        if y >= state.pixels.shape()[0] || x >= state.pixels.shape()[1] {
            return None;
        }
        Some([
            state.pixels[[y, x, 0]],
            state.pixels[[y, x, 1]],
            state.pixels[[y, x, 2]],
        ])
    }

    /// Copies the current contents into a standalone RGB frame.
    pub fn to_frame(&self) -> Frame {
        let state = self.inner.borrow();
        let (h, w, _) = state.pixels.dim();
        let data = state.pixels.iter().copied().collect();
        Frame::new(data, w as u32, h as u32, 3, 0)
    }
}

/// Pixels whose centres fall in `[start, end)`, limited to `0..limit`.
fn pixel_span(start: f64, end: f64, limit: usize) -> Range<usize> {
    let first = (start - 0.5).ceil().max(0.0) as usize;
    let last = ((end - 0.5).ceil().max(0.0) as usize).min(limit);
    first..last.max(first)
}

impl RenderSurface for CpuCanvas {
    fn container_size(&self) -> Option<(u32, u32)> {
        self.inner.borrow().container
    }

    fn size(&self) -> (u32, u32) {
        let (h, w, _) = self.inner.borrow().pixels.dim();
        (w as u32, h as u32)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        let mut state = self.inner.borrow_mut();
        if state.pixels.dim() != (height as usize, width as usize, 3) {
            state.pixels = Array3::zeros((height as usize, width as usize, 3));
        }
    }

    fn clear(&mut self, color: Rgba) {
        let mut state = self.inner.borrow_mut();
        for mut px in state.pixels.rows_mut() {
            let blended = color.blend_over([0, 0, 0]);
            px[0] = blended[0];
            px[1] = blended[1];
            px[2] = blended[2];
        }
    }

    fn draw_region(&mut self, frame: &Frame, dest: Rect, clip: Rect) {
        if dest.width <= 0.0 || dest.height <= 0.0 || frame.width() == 0 || frame.height() == 0 {
            return;
        }
        let Some(area) = dest.intersect(&clip) else {
            return;
        };
        let mut state = self.inner.borrow_mut();
        let (h, w, _) = state.pixels.dim();
        let src = frame.as_ndarray();
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);

        for y in pixel_span(area.y, area.bottom(), h) {
            let v = (y as f64 + 0.5 - dest.y) / dest.height;
            let sy = ((v * fh as f64) as usize).min(fh - 1);
            for x in pixel_span(area.x, area.right(), w) {
                let u = (x as f64 + 0.5 - dest.x) / dest.width;
                let sx = ((u * fw as f64) as usize).min(fw - 1);
                for c in 0..3 {
                    state.pixels[[y, x, c]] = src[[sy, sx, c]];
                }
            }
        }
    }

    fn fill_rect(&mut self, color: Rgba, rect: Rect) {
        let mut state = self.inner.borrow_mut();
        let (h, w, _) = state.pixels.dim();
        let rows = pixel_span(rect.y, rect.bottom(), h);
        let cols = pixel_span(rect.x, rect.right(), w);
        let mut region = state.pixels.slice_mut(s![rows, cols, ..]);
        for mut px in region.rows_mut() {
            let blended = color.blend_over([px[0], px[1], px[2]]);
            px[0] = blended[0];
            px[1] = blended[1];
            px[2] = blended[2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sized(w: u32, h: u32) -> CpuCanvas {
        let mut canvas = CpuCanvas::new(w, h);
        canvas.set_size(w, h);
        canvas
    }

    #[rstest]
    #[case(0.0, 10.0, 100, 0..10)]
    #[case(9.0, 11.0, 100, 9..11)]
    #[case(-5.0, 3.0, 100, 0..3)]
    #[case(95.0, 120.0, 100, 95..100)]
    #[case(4.6, 4.9, 100, 5..5)]
    fn test_pixel_span(
        #[case] start: f64,
        #[case] end: f64,
        #[case] limit: usize,
        #[case] expected: Range<usize>,
    ) {
        assert_eq!(pixel_span(start, end, limit), expected);
    }

    #[test]
    fn test_clear_fills_every_pixel() {
        let mut canvas = sized(4, 3);
        canvas.clear(Rgba::BACKGROUND);
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(canvas.pixel(x, y), Some([11, 12, 15]));
            }
        }
        assert_eq!(canvas.pixel(4, 0), None);
    }

    #[test]
    fn test_draw_region_scales_into_destination() {
        let mut canvas = sized(8, 4);
        canvas.clear(Rgba::opaque(0, 0, 0));
        // 2x1 frame: left pixel red, right pixel blue
        let frame = Frame::new(vec![255, 0, 0, 0, 0, 255], 2, 1, 3, 0);
        let dest = Rect::new(0.0, 0.0, 8.0, 4.0);
        canvas.draw_region(&frame, dest, dest);

        assert_eq!(canvas.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(canvas.pixel(3, 3), Some([255, 0, 0]));
        assert_eq!(canvas.pixel(4, 0), Some([0, 0, 255]));
        assert_eq!(canvas.pixel(7, 3), Some([0, 0, 255]));
    }

    #[test]
    fn test_draw_region_respects_clip() {
        let mut canvas = sized(10, 2);
        canvas.clear(Rgba::opaque(0, 0, 0));
        let frame = Frame::solid(1, 1, [9, 9, 9], 0);
        canvas.draw_region(
            &frame,
            Rect::new(-5.0, 0.0, 20.0, 2.0),
            Rect::new(2.0, 0.0, 3.0, 2.0),
        );

        assert_eq!(canvas.pixel(1, 0), Some([0, 0, 0]));
        assert_eq!(canvas.pixel(2, 0), Some([9, 9, 9]));
        assert_eq!(canvas.pixel(4, 1), Some([9, 9, 9]));
        assert_eq!(canvas.pixel(5, 1), Some([0, 0, 0]));
    }

    #[test]
    fn test_fill_rect_blends_alpha() {
        let mut canvas = sized(4, 4);
        canvas.clear(Rgba::opaque(0, 0, 100));
        let color = Rgba {
            r: 200,
            g: 100,
            b: 0,
            a: 0.5,
        };
        canvas.fill_rect(color, Rect::new(1.0, 0.0, 2.0, 4.0));

        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 100]));
        assert_eq!(canvas.pixel(1, 2), Some([100, 50, 50]));
        assert_eq!(canvas.pixel(2, 3), Some([100, 50, 50]));
        assert_eq!(canvas.pixel(3, 0), Some([0, 0, 100]));
    }

    #[test]
    fn test_clones_share_pixels() {
        let mut canvas = sized(2, 2);
        let observer = canvas.clone();
        canvas.clear(Rgba::opaque(1, 2, 3));
        assert_eq!(observer.pixel(1, 1), Some([1, 2, 3]));
        assert_eq!(observer.size(), (2, 2));
    }

    #[test]
    fn test_set_size_same_dimensions_keeps_contents() {
        let mut canvas = sized(3, 3);
        canvas.clear(Rgba::opaque(5, 5, 5));
        canvas.set_size(3, 3);
        assert_eq!(canvas.pixel(0, 0), Some([5, 5, 5]));
        canvas.set_size(6, 2);
        assert_eq!(canvas.size(), (6, 2));
    }

    #[test]
    fn test_container_can_detach() {
        let canvas = CpuCanvas::new(640, 480);
        assert_eq!(canvas.container_size(), Some((640, 480)));
        canvas.detach_container();
        assert_eq!(canvas.container_size(), None);
        canvas.resize_container(320, 240);
        assert_eq!(canvas.container_size(), Some((320, 240)));
    }

    #[test]
    fn test_to_frame_copies_pixels() {
        let mut canvas = sized(3, 2);
        canvas.clear(Rgba::opaque(7, 8, 9));
        let frame = canvas.to_frame();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.rgb_at(2, 1), [7, 8, 9]);
    }
}
