//! Camera frame sources.
//!
//! This module provides the sources the client captures from:
//! - Synthetic `stub://` cameras (tests, dry runs)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source is started once per session. Start failures (permission denied,
//! device missing, busy) are reported to the caller exactly once; sources never
//! retry on their own. While active, the source exclusively owns the device
//! handle and releases it on `stop()`.
//!
//! Sources MUST NOT:
//! - Store captured frames to disk
//! - Retain frames beyond handoff to the encoder
//! - Log frame content

mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::{Frame, FrameSize};

pub use normalize::{normalize_to_rgb, PixelFormat};

/// Anything that can hand the capture loop its current frame.
pub trait FrameSource {
    /// Human-readable source identifier (device path or stub URL).
    fn name(&self) -> &str;

    /// Acquire the device. Called once per session.
    fn start(&mut self) -> Result<()>;

    /// Current frame. Only valid between `start()` and `stop()`.
    fn current_frame(&mut self) -> Result<Frame>;

    /// Release the device. Must be safe to call when not started.
    fn stop(&mut self);

    fn is_active(&self) -> bool;

    fn stats(&self) -> CaptureStats;
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or "stub://name" for a synthetic camera.
    pub device: String,
    /// Requested stream resolution.
    pub size: FrameSize,
    /// Requested device frame rate.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            size: FrameSize::new(640, 480),
            target_fps: 30,
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera source selected by device string.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(synthetic::SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(v4l2::V4l2Camera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.size.is_empty() {
            return Err(anyhow!("camera size {} has a zero dimension", config.size));
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(synthetic::SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::V4l2(v4l2::V4l2Camera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera device '{}' requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.name(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.name(),
        }
    }

    fn start(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.start(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.start(),
        }
    }

    fn current_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.current_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.current_frame(),
        }
    }

    fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.stop(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stop(),
        }
    }

    fn is_active(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_active(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.is_active(),
        }
    }

    fn stats(&self) -> CaptureStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_device_selects_synthetic_backend() -> Result<()> {
        let mut camera = CameraSource::new(CameraConfig::default())?;
        assert_eq!(camera.name(), "stub://camera");
        assert!(!camera.is_active());

        camera.start()?;
        let frame = camera.current_frame()?;
        assert_eq!(frame.size(), FrameSize::new(640, 480));
        assert_eq!(camera.stats().frames_captured, 1);

        camera.stop();
        assert!(!camera.is_active());
        Ok(())
    }

    #[test]
    fn zero_sized_camera_is_rejected() {
        let config = CameraConfig {
            size: FrameSize::new(0, 480),
            ..CameraConfig::default()
        };
        assert!(CameraSource::new(config).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_path_requires_feature() {
        let config = CameraConfig {
            device: "/dev/video0".to_string(),
            ..CameraConfig::default()
        };
        let err = CameraSource::new(config).err().unwrap();
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
