//! Operating mode and confidence threshold selected by the user.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Inference mode requested from the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Bounding boxes.
    #[default]
    Detect,
    /// Bounding boxes plus polygon masks.
    Segment,
    /// Whole-frame class scores.
    Classify,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Detect => "detect",
            Mode::Segment => "segment",
            Mode::Classify => "classify",
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Mode::Classify)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detect" => Ok(Mode::Detect),
            "segment" => Ok(Mode::Segment),
            "classify" => Ok(Mode::Classify),
            other => Err(anyhow!(
                "unknown mode '{}'; expected detect, segment or classify",
                other
            )),
        }
    }
}

/// Holds the mode and advisory confidence threshold stamped on every frame request.
#[derive(Clone, Debug)]
pub struct ModeController {
    mode: Mode,
    confidence: f32,
}

impl ModeController {
    pub fn new(mode: Mode, confidence: f32) -> Result<Self> {
        let mut controller = Self {
            mode,
            confidence: DEFAULT_CONFIDENCE,
        };
        controller.set_confidence(confidence)?;
        Ok(controller)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns true when the mode actually changed; callers must then clear
    /// any detection state rendered under the previous mode.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        log::info!("mode: {} -> {}", self.mode, mode);
        self.mode = mode;
        true
    }

    /// Clamp to [0, 1]. Non-finite values are rejected and leave the threshold unchanged.
    pub fn set_confidence(&mut self, confidence: f32) -> Result<f32> {
        if !confidence.is_finite() {
            return Err(anyhow!("confidence threshold must be finite"));
        }
        self.confidence = confidence.clamp(0.0, 1.0);
        Ok(self.confidence)
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_mode_reports_change_only_once() {
        let mut controller = ModeController::default();
        assert!(!controller.set_mode(Mode::Detect));
        assert!(controller.set_mode(Mode::Classify));
        assert!(!controller.set_mode(Mode::Classify));
        assert_eq!(controller.mode(), Mode::Classify);
    }

    #[test]
    fn confidence_is_clamped() -> Result<()> {
        let mut controller = ModeController::default();
        assert_eq!(controller.set_confidence(1.7)?, 1.0);
        assert_eq!(controller.set_confidence(-0.2)?, 0.0);
        assert_eq!(controller.set_confidence(0.4)?, 0.4);
        Ok(())
    }

    #[test]
    fn nan_confidence_rejected_without_change() {
        let mut controller = ModeController::default();
        assert!(controller.set_confidence(f32::NAN).is_err());
        assert_eq!(controller.confidence(), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn parse_modes() {
        assert_eq!("Segment".parse::<Mode>().unwrap(), Mode::Segment);
        assert!("pose".parse::<Mode>().is_err());
    }
}
