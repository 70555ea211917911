//! Heads-up overlay.
//!
//! Rendering happens in two steps. `HudRenderer::plan` turns the current snapshot
//! into an `OverlayPlan`, which is a flat list of draw operations in surface pixels.
//! `OverlaySurface::paint` then rasterises that plan onto an RGBA image. Planning
//! is pure, so everything the HUD decides to show can be checked without pixels.
//!
//! Items whose geometry does not validate are skipped; a bad polygon only loses
//! its fill. Nothing in here returns an error or panics on service input.

pub mod geometry;
mod raster;

use std::time::{Duration, Instant};

use image::Rgba;

use crate::frame::FrameSize;
use crate::mode::Mode;
use crate::protocol::{Classification, Detection};
use crate::state::Snapshot;
use crate::stats::Stats;

pub use geometry::PixelRect;
pub use raster::OverlaySurface;

/// Classification bars shown at most.
pub const MAX_CLASSIFICATION_BARS: usize = 5;

const PALETTE: [[u8; 3]; 8] = [
    [0, 229, 255],
    [118, 255, 3],
    [255, 214, 0],
    [255, 64, 129],
    [124, 77, 255],
    [255, 145, 0],
    [29, 233, 182],
    [240, 98, 146],
];
const CHROME: [u8; 3] = [0, 229, 255];
const TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Visual parameters of the overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct HudStyle {
    /// Time for the scanline to travel from top to bottom once.
    pub scanline_period: Duration,
    pub scanline_height: u32,
    pub scanline_alpha: u8,
    pub border_inset: i32,
    pub border_len: i32,
    pub stroke: u32,
    pub label_px: f32,
    pub polygon_alpha: u8,
    pub show_stats: bool,
}

impl Default for HudStyle {
    fn default() -> Self {
        Self {
            scanline_period: Duration::from_millis(3000),
            scanline_height: 48,
            scanline_alpha: 72,
            border_inset: 12,
            border_len: 32,
            stroke: 2,
            label_px: 14.0,
            polygon_alpha: 64,
            show_stats: true,
        }
    }
}

/// What part of the HUD a draw op belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Detection,
    Classification,
    Scanline,
    Border,
    Stats,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    StrokeRect {
        rect: PixelRect,
        color: Rgba<u8>,
        thickness: u32,
    },
    FillRect {
        rect: PixelRect,
        color: Rgba<u8>,
    },
    Line {
        from: (i32, i32),
        to: (i32, i32),
        color: Rgba<u8>,
        thickness: u32,
    },
    FillPolygon {
        points: Vec<(i32, i32)>,
        color: Rgba<u8>,
    },
    Text {
        x: i32,
        y: i32,
        px: f32,
        text: String,
        color: Rgba<u8>,
    },
    /// Full-width band whose alpha peaks at its middle row.
    GradientBand {
        top: i32,
        height: u32,
        color: [u8; 3],
        peak_alpha: u8,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedOp {
    pub layer: Layer,
    pub op: DrawOp,
}

/// Draw operations for one render tick, in painting order.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayPlan {
    pub size: FrameSize,
    pub ops: Vec<PlannedOp>,
}

impl OverlayPlan {
    fn new(size: FrameSize) -> Self {
        Self {
            size,
            ops: Vec::new(),
        }
    }

    fn push(&mut self, layer: Layer, op: DrawOp) {
        self.ops.push(PlannedOp { layer, op });
    }

    pub fn layer(&self, layer: Layer) -> impl Iterator<Item = &DrawOp> + '_ {
        self.ops
            .iter()
            .filter(move |planned| planned.layer == layer)
            .map(|planned| &planned.op)
    }

    /// Outlines of the detection boxes, one per drawn detection.
    pub fn detection_boxes(&self) -> Vec<PixelRect> {
        self.layer(Layer::Detection)
            .filter_map(|op| match op {
                DrawOp::StrokeRect { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    /// Labels of the classification bars, top to bottom.
    pub fn classification_labels(&self) -> Vec<&str> {
        self.layer(Layer::Classification)
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn polygon_fills(&self) -> usize {
        self.layer(Layer::Detection)
            .filter(|op| matches!(op, DrawOp::FillPolygon { .. }))
            .count()
    }
}

pub struct HudRenderer {
    style: HudStyle,
    epoch: Instant,
}

impl HudRenderer {
    /// `epoch` anchors the scanline animation.
    pub fn new(style: HudStyle, epoch: Instant) -> Self {
        Self { style, epoch }
    }

    pub fn style(&self) -> &HudStyle {
        &self.style
    }

    /// Plan one frame of the overlay for `mode`.
    ///
    /// Only items matching the active routine are drawn: detections (with
    /// polygons in segment mode) or classification bars.
    pub fn plan(
        &self,
        snapshot: &Snapshot,
        mode: Mode,
        stats: &Stats,
        size: FrameSize,
        now: Instant,
    ) -> OverlayPlan {
        let mut plan = OverlayPlan::new(size);
        if size.is_empty() {
            return plan;
        }

        if mode.is_classification() {
            self.plan_classifications(&mut plan, snapshot.result.classifications());
        } else {
            for detection in snapshot.result.detections() {
                self.plan_detection(&mut plan, detection);
            }
        }

        self.plan_scanline(&mut plan, now);
        self.plan_border(&mut plan);
        if self.style.show_stats {
            self.plan_stats(&mut plan, stats);
        }
        plan
    }

    fn plan_detection(&self, plan: &mut OverlayPlan, detection: &Detection) {
        let Some(rect) = geometry::scale_bbox(&detection.bbox, plan.size) else {
            log::debug!("hud: skipping '{}' with malformed bbox", detection.class);
            return;
        };
        let color = class_color(&detection.class);

        let polygon = detection
            .polygon
            .as_deref()
            .and_then(|points| geometry::scale_polygon(points, plan.size));
        if let Some(points) = polygon {
            plan.push(
                Layer::Detection,
                DrawOp::FillPolygon {
                    points,
                    color: with_alpha(color, self.style.polygon_alpha),
                },
            );
        }

        let opaque = with_alpha(color, 255);
        plan.push(
            Layer::Detection,
            DrawOp::StrokeRect {
                rect,
                color: with_alpha(color, 160),
                thickness: 1,
            },
        );
        let len = geometry::bracket_len(&rect);
        for (from, to) in geometry::corner_brackets(&rect, len) {
            plan.push(
                Layer::Detection,
                DrawOp::Line {
                    from,
                    to,
                    color: opaque,
                    thickness: self.style.stroke,
                },
            );
        }

        let text = label_text(&detection.class, detection.confidence);
        let px = self.style.label_px;
        let chip_h = (px * 1.4).round() as i32;
        let chip_w = text_width(&text, px) + 8;
        // Above the box when it fits, otherwise tucked inside the top edge.
        let chip_top = if rect.top - chip_h >= 0 {
            rect.top - chip_h
        } else {
            rect.top
        };
        let chip = PixelRect::new(rect.left, chip_top, rect.left + chip_w, chip_top + chip_h);
        plan.push(
            Layer::Detection,
            DrawOp::FillRect {
                rect: chip,
                color: with_alpha(color, 200),
            },
        );
        plan.push(
            Layer::Detection,
            DrawOp::Text {
                x: chip.left + 4,
                y: chip.top + ((chip_h as f32 - px) / 2.0).round() as i32,
                px,
                text,
                color: Rgba([0, 0, 0, 255]),
            },
        );
    }

    fn plan_classifications(&self, plan: &mut OverlayPlan, items: &[Classification]) {
        let mut ranked: Vec<&Classification> = items
            .iter()
            .filter(|c| c.confidence.is_finite())
            .collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(MAX_CLASSIFICATION_BARS);

        let width = plan.size.width as i32;
        let px = self.style.label_px;
        let margin = self.style.border_inset + 12;
        let track_w = (width - 2 * margin).clamp(0, 320);
        let bar_h = (px * 1.6).round() as i32;
        let gap = 6;

        for (row, item) in ranked.iter().enumerate() {
            let top = margin + row as i32 * (bar_h + gap);
            let track = PixelRect::new(margin, top, margin + track_w, top + bar_h);
            let fill_w = (track_w as f64 * item.confidence.clamp(0.0, 1.0)).round() as i32;
            let color = class_color(&item.class);

            plan.push(
                Layer::Classification,
                DrawOp::FillRect {
                    rect: track,
                    color: Rgba([0, 0, 0, 110]),
                },
            );
            if fill_w > 0 {
                plan.push(
                    Layer::Classification,
                    DrawOp::FillRect {
                        rect: PixelRect::new(margin, top, margin + fill_w, top + bar_h),
                        color: with_alpha(color, 170),
                    },
                );
            }
            plan.push(
                Layer::Classification,
                DrawOp::Text {
                    x: margin + 6,
                    y: top + ((bar_h as f32 - px) / 2.0).round() as i32,
                    px,
                    text: label_text(&item.class, item.confidence),
                    color: TEXT,
                },
            );
        }
    }

    fn plan_scanline(&self, plan: &mut OverlayPlan, now: Instant) {
        let band = self.style.scanline_height.max(1);
        let period = self.style.scanline_period.as_millis().max(1);
        let elapsed = now.saturating_duration_since(self.epoch).as_millis();
        let phase = (elapsed % period) as f64 / period as f64;
        // Travel spans the surface plus one band so the band enters and leaves off-screen.
        let travel = plan.size.height as f64 + band as f64;
        let top = (phase * travel).round() as i32 - band as i32;
        plan.push(
            Layer::Scanline,
            DrawOp::GradientBand {
                top,
                height: band,
                color: CHROME,
                peak_alpha: self.style.scanline_alpha,
            },
        );
    }

    fn plan_border(&self, plan: &mut OverlayPlan) {
        let inset = self.style.border_inset;
        let w = plan.size.width as i32;
        let h = plan.size.height as i32;
        let frame = PixelRect::new(inset, inset, w - 1 - inset, h - 1 - inset);
        if frame.width() <= 0 || frame.height() <= 0 {
            return;
        }
        let len = self
            .style
            .border_len
            .min(frame.width() / 2)
            .min(frame.height() / 2);
        for (from, to) in geometry::corner_brackets(&frame, len) {
            plan.push(
                Layer::Border,
                DrawOp::Line {
                    from,
                    to,
                    color: with_alpha(CHROME, 220),
                    thickness: self.style.stroke,
                },
            );
        }
    }

    fn plan_stats(&self, plan: &mut OverlayPlan, stats: &Stats) {
        let px = self.style.label_px;
        let text = format!(
            "{} fps  {} ms  {} obj  {:.0}%",
            stats.fps,
            stats.last_inference_ms,
            stats.object_count,
            stats.avg_confidence * 100.0
        );
        let x = self.style.border_inset + 12;
        let y = plan.size.height as i32 - self.style.border_inset - 12 - px.round() as i32;
        plan.push(
            Layer::Stats,
            DrawOp::Text {
                x,
                y,
                px,
                text,
                color: with_alpha(CHROME, 255),
            },
        );
    }
}

/// `"person 87%"`.
pub fn label_text(class: &str, confidence: f64) -> String {
    let pct = if confidence.is_finite() {
        (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    } else {
        0
    };
    format!("{} {}%", class, pct)
}

/// Stable per-class color.
fn class_color(class: &str) -> [u8; 3] {
    let hash = class
        .bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
    PALETTE[hash as usize % PALETTE.len()]
}

fn with_alpha(rgb: [u8; 3], alpha: u8) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], alpha])
}

/// Rough advance width; chips are sized before a font is known.
fn text_width(text: &str, px: f32) -> i32 {
    (text.chars().count() as f32 * px * 0.6).ceil() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ResultItems, VisionResult};
    use crate::state::DetectionState;

    const VGA: FrameSize = FrameSize::new(640, 480);

    fn detection(class: &str, bbox: Vec<f64>) -> Detection {
        Detection {
            class: class.to_string(),
            confidence: 0.87,
            bbox,
            polygon: None,
        }
    }

    fn snapshot_of(mode: Mode, items: ResultItems) -> Snapshot {
        let mut state = DetectionState::new(mode);
        state.replace(
            VisionResult {
                mode,
                inference_ms: 20,
                items,
            },
            Instant::now(),
        );
        (*state.snapshot()).clone()
    }

    fn renderer() -> HudRenderer {
        HudRenderer::new(HudStyle::default(), Instant::now())
    }

    #[test]
    fn person_box_lands_on_expected_pixels() {
        let snapshot = snapshot_of(
            Mode::Detect,
            ResultItems::Detections(vec![detection("person", vec![0.1, 0.1, 0.5, 0.6])]),
        );
        let plan = renderer().plan(&snapshot, Mode::Detect, &Stats::default(), VGA, Instant::now());
        assert_eq!(plan.detection_boxes(), vec![PixelRect::new(64, 48, 320, 288)]);
        assert!(plan
            .layer(Layer::Detection)
            .any(|op| matches!(op, DrawOp::Text { text, .. } if text == "person 87%")));
    }

    #[test]
    fn empty_snapshot_draws_only_chrome() {
        let state = DetectionState::new(Mode::Detect);
        let plan = HudRenderer::new(
            HudStyle {
                show_stats: false,
                ..HudStyle::default()
            },
            Instant::now(),
        )
        .plan(&state.snapshot(), Mode::Detect, &Stats::default(), VGA, Instant::now());

        assert_eq!(plan.layer(Layer::Detection).count(), 0);
        assert_eq!(plan.layer(Layer::Scanline).count(), 1);
        assert_eq!(plan.layer(Layer::Border).count(), 8);
        assert_eq!(plan.ops.len(), 9);
    }

    #[test]
    fn malformed_detection_is_skipped_others_drawn() {
        let snapshot = snapshot_of(
            Mode::Detect,
            ResultItems::Detections(vec![
                detection("ghost", vec![0.1, f64::NAN, 0.5, 0.6]),
                detection("cup", vec![0.2, 0.2, 0.3, 0.3]),
                detection("flat", vec![0.2, 0.2, 0.2, 0.3]),
            ]),
        );
        let plan = renderer().plan(&snapshot, Mode::Detect, &Stats::default(), VGA, Instant::now());
        assert_eq!(plan.detection_boxes().len(), 1);
    }

    #[test]
    fn segment_mode_fills_valid_polygons_only() {
        let mut good = detection("person", vec![0.1, 0.1, 0.5, 0.6]);
        good.polygon = Some(vec![vec![0.1, 0.1], vec![0.5, 0.1], vec![0.3, 0.6]]);
        let mut bad = detection("dog", vec![0.6, 0.6, 0.9, 0.9]);
        bad.polygon = Some(vec![vec![0.6, 0.6], vec![0.9, 0.9]]);
        let snapshot = snapshot_of(Mode::Segment, ResultItems::Detections(vec![good, bad]));

        let plan = renderer().plan(&snapshot, Mode::Segment, &Stats::default(), VGA, Instant::now());
        assert_eq!(plan.detection_boxes().len(), 2);
        assert_eq!(plan.polygon_fills(), 1);
    }

    #[test]
    fn detect_mode_fills_a_polygon_when_one_arrives() {
        let mut outlined = detection("person", vec![0.1, 0.1, 0.5, 0.6]);
        outlined.polygon = Some(vec![vec![0.1, 0.1], vec![0.5, 0.1], vec![0.3, 0.6]]);
        let plain = detection("cup", vec![0.6, 0.6, 0.9, 0.9]);
        let snapshot = snapshot_of(Mode::Detect, ResultItems::Detections(vec![outlined, plain]));

        let plan = renderer().plan(&snapshot, Mode::Detect, &Stats::default(), VGA, Instant::now());
        assert_eq!(plan.detection_boxes().len(), 2);
        assert_eq!(plan.polygon_fills(), 1);
    }

    #[test]
    fn classification_bars_are_ranked_and_capped() {
        let items = [0.1, 0.9, 0.3, 0.5, 0.7, 0.2, f64::NAN]
            .iter()
            .enumerate()
            .map(|(i, c)| Classification {
                class: format!("c{}", i),
                confidence: *c,
            })
            .collect();
        let snapshot = snapshot_of(Mode::Classify, ResultItems::Classifications(items));
        let plan = renderer().plan(&snapshot, Mode::Classify, &Stats::default(), VGA, Instant::now());
        assert_eq!(
            plan.classification_labels(),
            vec!["c1 90%", "c4 70%", "c3 50%", "c2 30%", "c5 20%"]
        );
    }

    #[test]
    fn mode_change_leaves_no_boxes_on_next_plan() {
        let mut state = DetectionState::new(Mode::Detect);
        state.replace(
            VisionResult {
                mode: Mode::Detect,
                inference_ms: 15,
                items: ResultItems::Detections(vec![
                    detection("a", vec![0.1, 0.1, 0.2, 0.2]),
                    detection("b", vec![0.3, 0.3, 0.4, 0.4]),
                    detection("c", vec![0.5, 0.5, 0.6, 0.6]),
                ]),
            },
            Instant::now(),
        );
        let hud = renderer();
        let before = hud.plan(&state.snapshot(), Mode::Detect, &Stats::default(), VGA, Instant::now());
        assert_eq!(before.detection_boxes().len(), 3);

        state.clear(Mode::Classify);
        let after = hud.plan(&state.snapshot(), Mode::Classify, &Stats::default(), VGA, Instant::now());
        assert!(after.detection_boxes().is_empty());
        assert!(after.classification_labels().is_empty());
    }

    #[test]
    fn scanline_wraps_with_period() {
        let epoch = Instant::now();
        let hud = HudRenderer::new(HudStyle::default(), epoch);
        let state = DetectionState::new(Mode::Detect);
        let band_top = |at: Instant| {
            hud.plan(&state.snapshot(), Mode::Detect, &Stats::default(), VGA, at)
                .layer(Layer::Scanline)
                .find_map(|op| match op {
                    DrawOp::GradientBand { top, .. } => Some(*top),
                    _ => None,
                })
                .unwrap()
        };
        let start = band_top(epoch);
        assert_eq!(start, -48);
        assert!(band_top(epoch + Duration::from_millis(1500)) > start);
        assert_eq!(band_top(epoch + Duration::from_millis(3000)), start);
    }

    #[test]
    fn zero_sized_surface_plans_nothing() {
        let state = DetectionState::new(Mode::Detect);
        let plan = renderer().plan(
            &state.snapshot(),
            Mode::Detect,
            &Stats::default(),
            FrameSize::new(0, 0),
            Instant::now(),
        );
        assert!(plan.ops.is_empty());
    }
}
