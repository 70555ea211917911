//! Normalized → pixel geometry, with the sanity checks that keep bad items off screen.

use crate::frame::FrameSize;

/// Bracket accent length as a fraction of the shorter box side.
pub const BRACKET_RATIO: f64 = 0.2;
pub const BRACKET_MIN_PX: i32 = 6;
pub const BRACKET_MAX_PX: i32 = 24;

/// Inclusive-exclusive pixel rectangle, `(left, top)-(right, bottom)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

fn is_normalized(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

fn scale(v: f64, extent: u32) -> i32 {
    (v * extent as f64).round() as i32
}

/// Scale an `[x1, y1, x2, y2]` box to surface pixels.
///
/// Returns `None` for wrong arity, non-finite or out-of-range coordinates, and
/// boxes with no positive extent after scaling.
pub fn scale_bbox(bbox: &[f64], surface: FrameSize) -> Option<PixelRect> {
    let [x1, y1, x2, y2] = <[f64; 4]>::try_from(bbox).ok()?;
    if ![x1, y1, x2, y2].into_iter().all(is_normalized) {
        return None;
    }
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let rect = PixelRect::new(
        scale(x1, surface.width),
        scale(y1, surface.height),
        scale(x2, surface.width),
        scale(y2, surface.height),
    );
    if rect.width() <= 0 || rect.height() <= 0 {
        return None;
    }
    Some(rect)
}

/// Scale a polygon to surface pixels.
///
/// Returns `None` unless every point is a finite, in-range `[x, y]` pair and at
/// least three distinct vertices remain. A closing point equal to the first is
/// dropped.
pub fn scale_polygon(points: &[Vec<f64>], surface: FrameSize) -> Option<Vec<(i32, i32)>> {
    let mut scaled: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for point in points {
        let [x, y] = <[f64; 2]>::try_from(point.as_slice()).ok()?;
        if !is_normalized(x) || !is_normalized(y) {
            return None;
        }
        let p = (scale(x, surface.width), scale(y, surface.height));
        if scaled.last() != Some(&p) {
            scaled.push(p);
        }
    }
    while scaled.len() > 1 && scaled.first() == scaled.last() {
        scaled.pop();
    }
    if scaled.len() < 3 {
        return None;
    }
    Some(scaled)
}

/// Corner accent length for a box: proportional to its shorter side, clamped.
pub fn bracket_len(rect: &PixelRect) -> i32 {
    let shorter = rect.width().min(rect.height()) as f64;
    ((shorter * BRACKET_RATIO).round() as i32).clamp(BRACKET_MIN_PX, BRACKET_MAX_PX)
}

/// Four L-shaped accents, two segments each, hugging the rectangle corners.
pub fn corner_brackets(rect: &PixelRect, len: i32) -> [((i32, i32), (i32, i32)); 8] {
    let PixelRect {
        left,
        top,
        right,
        bottom,
    } = *rect;
    [
        ((left, top), (left + len, top)),
        ((left, top), (left, top + len)),
        ((right, top), (right - len, top)),
        ((right, top), (right, top + len)),
        ((left, bottom), (left + len, bottom)),
        ((left, bottom), (left, bottom - len)),
        ((right, bottom), (right - len, bottom)),
        ((right, bottom), (right, bottom - len)),
    ]
}
