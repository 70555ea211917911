use std::path::Path;

use ab_glyph::FontVec;
use anyhow::{anyhow, Context, Result};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
    draw_text_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

use super::{DrawOp, OverlayPlan, PixelRect};
use crate::frame::FrameSize;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Transparent RGBA layer composited over the live video.
pub struct OverlaySurface {
    image: RgbaImage,
    font: Option<FontVec>,
}

impl OverlaySurface {
    pub fn new(size: FrameSize) -> Self {
        Self {
            image: RgbaImage::from_pixel(size.width, size.height, TRANSPARENT),
            font: None,
        }
    }

    /// Load a TrueType/OpenType font for labels. Without one, text ops are skipped.
    pub fn load_font(&mut self, path: &Path) -> Result<()> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("parse font {}: {}", path.display(), e))?;
        self.font = Some(font);
        Ok(())
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Reallocate when the container size changed. Returns true if it did.
    pub fn resize_to(&mut self, size: FrameSize) -> bool {
        if self.size() == size {
            return false;
        }
        log::debug!("hud: surface resized {} -> {}", self.size(), size);
        self.image = RgbaImage::from_pixel(size.width, size.height, TRANSPARENT);
        true
    }

    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = TRANSPARENT;
        }
    }

    /// Resize if needed, clear, then rasterise every op in order.
    pub fn paint(&mut self, plan: &OverlayPlan) {
        self.resize_to(plan.size);
        self.clear();
        if plan.size.is_empty() {
            return;
        }
        for planned in &plan.ops {
            self.paint_op(&planned.op);
        }
    }

    fn paint_op(&mut self, op: &DrawOp) {
        match op {
            DrawOp::StrokeRect {
                rect,
                color,
                thickness,
            } => {
                for i in 0..*thickness as i32 {
                    let inner = PixelRect::new(rect.left + i, rect.top + i, rect.right - i, rect.bottom - i);
                    if let Some(r) = to_rect(&inner) {
                        draw_hollow_rect_mut(&mut self.image, r, *color);
                    }
                }
            }
            DrawOp::FillRect { rect, color } => {
                if let Some(r) = to_rect(rect) {
                    draw_filled_rect_mut(&mut self.image, r, *color);
                }
            }
            DrawOp::Line {
                from,
                to,
                color,
                thickness,
            } => self.thick_line(*from, *to, *color, *thickness),
            DrawOp::FillPolygon { points, color } => {
                if points.len() < 3 || points.first() == points.last() {
                    return;
                }
                let poly: Vec<Point<i32>> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
                draw_polygon_mut(&mut self.image, &poly, *color);
            }
            DrawOp::Text {
                x,
                y,
                px,
                text,
                color,
            } => {
                if let Some(font) = &self.font {
                    draw_text_mut(&mut self.image, *color, *x, *y, *px, font, text);
                }
            }
            DrawOp::GradientBand {
                top,
                height,
                color,
                peak_alpha,
            } => self.gradient_band(*top, *height, *color, *peak_alpha),
        }
    }

    fn thick_line(&mut self, from: (i32, i32), to: (i32, i32), color: Rgba<u8>, thickness: u32) {
        let horizontal = (to.0 - from.0).abs() >= (to.1 - from.1).abs();
        let half = thickness.max(1) as i32 / 2;
        for i in 0..thickness.max(1) as i32 {
            let offset = (i - half) as f32;
            let (dx, dy) = if horizontal { (0.0, offset) } else { (offset, 0.0) };
            draw_line_segment_mut(
                &mut self.image,
                (from.0 as f32 + dx, from.1 as f32 + dy),
                (to.0 as f32 + dx, to.1 as f32 + dy),
                color,
            );
        }
    }

    fn gradient_band(&mut self, top: i32, height: u32, color: [u8; 3], peak_alpha: u8) {
        let rows = self.image.height() as i32;
        let span = height.max(1) as f64;
        for r in 0..height as i32 {
            let y = top + r;
            if y < 0 || y >= rows {
                continue;
            }
            let t = (2.0 * r as f64 + 1.0) / span - 1.0;
            let alpha = (peak_alpha as f64 * (1.0 - t.abs())).round() as u8;
            if alpha == 0 {
                continue;
            }
            let tint = Rgba([color[0], color[1], color[2], alpha]);
            for x in 0..self.image.width() {
                self.image.get_pixel_mut(x, y as u32).blend(&tint);
            }
        }
    }
}

fn to_rect(rect: &PixelRect) -> Option<Rect> {
    if rect.width() <= 0 || rect.height() <= 0 {
        return None;
    }
    Some(Rect::at(rect.left, rect.top).of_size(rect.width() as u32, rect.height() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hud::{Layer, PlannedOp};

    fn plan(size: FrameSize, ops: Vec<DrawOp>) -> OverlayPlan {
        OverlayPlan {
            size,
            ops: ops
                .into_iter()
                .map(|op| PlannedOp {
                    layer: Layer::Detection,
                    op,
                })
                .collect(),
        }
    }

    #[test]
    fn paint_resizes_and_clears() {
        let mut surface = OverlaySurface::new(FrameSize::new(4, 4));
        let red = Rgba([255, 0, 0, 255]);
        surface.paint(&plan(
            FrameSize::new(8, 6),
            vec![DrawOp::FillRect {
                rect: PixelRect::new(0, 0, 2, 2),
                color: red,
            }],
        ));
        assert_eq!(surface.size(), FrameSize::new(8, 6));
        assert_eq!(*surface.image().get_pixel(1, 1), red);

        surface.paint(&plan(FrameSize::new(8, 6), Vec::new()));
        assert_eq!(*surface.image().get_pixel(1, 1), TRANSPARENT);
    }

    #[test]
    fn degenerate_and_offscreen_ops_do_not_panic() {
        let mut surface = OverlaySurface::new(FrameSize::new(16, 16));
        let c = Rgba([1, 2, 3, 255]);
        surface.paint(&plan(
            FrameSize::new(16, 16),
            vec![
                DrawOp::FillRect {
                    rect: PixelRect::new(5, 5, 5, 9),
                    color: c,
                },
                DrawOp::StrokeRect {
                    rect: PixelRect::new(-40, -40, 400, 400),
                    color: c,
                    thickness: 3,
                },
                DrawOp::FillPolygon {
                    points: vec![(1, 1), (2, 2)],
                    color: c,
                },
                DrawOp::FillPolygon {
                    points: vec![(1, 1), (8, 1), (1, 1)],
                    color: c,
                },
                DrawOp::Line {
                    from: (-10, 3),
                    to: (100, 3),
                    color: c,
                    thickness: 2,
                },
                DrawOp::GradientBand {
                    top: -20,
                    height: 48,
                    color: [0, 255, 255],
                    peak_alpha: 80,
                },
                DrawOp::Text {
                    x: 2,
                    y: 2,
                    px: 12.0,
                    text: "no font".to_string(),
                    color: c,
                },
            ],
        ));
        surface.paint(&plan(FrameSize::new(0, 0), Vec::new()));
        assert_eq!(surface.size(), FrameSize::new(0, 0));
    }

    #[test]
    fn gradient_band_peaks_mid_band() {
        let mut surface = OverlaySurface::new(FrameSize::new(4, 20));
        surface.paint(&plan(
            FrameSize::new(4, 20),
            vec![DrawOp::GradientBand {
                top: 0,
                height: 10,
                color: [0, 255, 0],
                peak_alpha: 100,
            }],
        ));
        let edge = surface.image().get_pixel(0, 0)[3];
        let mid = surface.image().get_pixel(0, 5)[3];
        assert!(mid > edge);
        assert_eq!(surface.image().get_pixel(0, 15)[3], 0);
    }

    #[test]
    fn polygon_fill_covers_interior() {
        let mut surface = OverlaySurface::new(FrameSize::new(20, 20));
        let c = Rgba([9, 9, 9, 64]);
        surface.paint(&plan(
            FrameSize::new(20, 20),
            vec![DrawOp::FillPolygon {
                points: vec![(2, 2), (18, 2), (18, 18), (2, 18)],
                color: c,
            }],
        ));
        assert_eq!(*surface.image().get_pixel(10, 10), c);
        assert_eq!(*surface.image().get_pixel(0, 0), TRANSPARENT);
    }
}
