use anyhow::{anyhow, Result};

use super::{CameraConfig, CaptureStats};
use crate::frame::Frame;

/// Synthetic camera for `stub://` devices.
///
/// Renders a slowly sweeping vertical bar over a gradient so consecutive frames
/// differ and the encoder has realistic work to do.
pub(super) struct SyntheticCamera {
    config: CameraConfig,
    active: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            active: false,
            frame_count: 0,
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.config.device
    }

    pub(super) fn start(&mut self) -> Result<()> {
        self.active = true;
        log::info!(
            "camera: started {} ({}, synthetic)",
            self.config.device,
            self.config.size
        );
        Ok(())
    }

    pub(super) fn current_frame(&mut self) -> Result<Frame> {
        if !self.active {
            return Err(anyhow!("camera {} not started", self.config.device));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(
            pixels,
            self.config.size.width,
            self.config.size.height,
            self.frame_count,
        )
    }

    pub(super) fn stop(&mut self) {
        if self.active {
            log::info!("camera: stopped {}", self.config.device);
        }
        self.active = false;
    }

    pub(super) fn is_active(&self) -> bool {
        self.active
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.size.width as usize;
        let height = self.config.size.height as usize;
        let bar_width = (width / 16).max(1);
        let bar_x = (self.frame_count as usize * 4) % width;

        let mut pixels = vec![0u8; self.config.size.rgb_len()];
        for y in 0..height {
            for x in 0..width {
                let offset = (y * width + x) * 3;
                let in_bar = x >= bar_x && x < bar_x + bar_width;
                if in_bar {
                    pixels[offset..offset + 3].copy_from_slice(&[230, 230, 230]);
                } else {
                    pixels[offset] = ((x * 255) / width) as u8;
                    pixels[offset + 1] = ((y * 255) / height) as u8;
                    pixels[offset + 2] = 64;
                }
            }
        }
        pixels
    }
}
