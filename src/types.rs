use serde::{Deserialize, Serialize};

/// A single landmark: normalized image coordinates plus relative depth.
///
/// `x` and `y` are in `[0, 1]` of the source frame, `z` is on roughly the
/// same scale as `x` (negative is closer to the camera).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Axis-aligned box in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Grow by `fraction` of each side, then clip to a `width` x `height` frame.
    pub fn padded_within(&self, fraction: f32, width: u32, height: u32) -> Rect {
        let pad_w = self.width * fraction;
        let pad_h = self.height * fraction;
        let x = (self.x - pad_w / 2.0).max(0.0);
        let y = (self.y - pad_h / 2.0).max(0.0);
        let w = (self.width + pad_w).min(width as f32 - x);
        let h = (self.height + pad_h).min(height as f32 - y);
        Rect::new(x, y, w.max(0.0), h.max(0.0))
    }
}

/// Pixel dimensions of a surface or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels, computed in `usize` so large frames cannot wrap.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// `#RRGGBB` to a colour; anything else (including non-ASCII input) is red.
pub fn parse_hex(hex: &str) -> (u8, u8, u8) {
    const FALLBACK: (u8, u8, u8) = (255, 0, 0);
    let Some(digits) = hex.strip_prefix('#').filter(|d| d.len() == 6 && d.is_ascii()) else {
        return FALLBACK;
    };
    let channel = |range: std::ops::Range<usize>| digits.get(range).and_then(|c| u8::from_str_radix(c, 16).ok());
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) => (r, g, b),
        _ => FALLBACK,
    }
}
