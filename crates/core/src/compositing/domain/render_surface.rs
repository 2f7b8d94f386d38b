use crate::shared::frame::Frame;

/// An 8-bit colour with a straight (non-premultiplied) alpha in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    /// `hsl(220, 15%, 5%)`, the surface clear colour.
    pub const BACKGROUND: Rgba = Rgba::opaque(11, 12, 15);

    /// Translucent light grey used for the eye divider.
    pub const DIVIDER: Rgba = Rgba {
        r: 210,
        g: 210,
        b: 220,
        a: 0.7,
    };

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Composites this colour over `dst`.
    pub fn blend_over(self, dst: [u8; 3]) -> [u8; 3] {
        let a = self.a.clamp(0.0, 1.0);
        let mix = |s: u8, d: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u8;
        [mix(self.r, dst[0]), mix(self.g, dst[1]), mix(self.b, dst[2])]
    }
}

/// Axis-aligned rectangle in surface pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Rect::new(x, y, right - x, bottom - y))
    }
}

/// A 2-D drawable surface the compositor paints into.
///
/// Implementations decide how a destination rectangle maps onto pixels; a
/// pixel belongs to a rectangle when its centre lies inside it.
pub trait RenderSurface {
    /// Size of the element hosting the surface, or `None` while it is
    /// detached or being laid out.
    fn container_size(&self) -> Option<(u32, u32)>;

    /// Current backing-store size in pixels.
    fn size(&self) -> (u32, u32);

    fn set_size(&mut self, width: u32, height: u32);

    fn clear(&mut self, color: Rgba);

    /// Scales the whole of `frame` into `dest`, touching only pixels inside
    /// `clip`.
    fn draw_region(&mut self, frame: &Frame, dest: Rect, clip: Rect);

    fn fill_rect(&mut self, color: Rgba, rect: Rect);
}
