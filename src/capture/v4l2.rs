//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates the capture size and
//! pixel format, and memory-maps a small buffer ring. `current_frame` dequeues the
//! next filled buffer and converts it to RGB8.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, CaptureStats};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

pub(super) struct V4l2Camera {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.size.width,
            active_height: config.size.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.config.device
    }

    pub(super) fn start(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera device {}", self.config.device))?;
        let mut format = device.format().context("read camera format")?;
        format.width = self.config.size.width;
        format.height = self.config.size.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "camera: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read camera format after set failure")?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "camera {} delivers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "camera: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create camera buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "camera: started {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub(super) fn current_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera not started")?;
        let width = self.active_width;
        let height = self.active_height;
        let format = self.format;
        let (pixels, w, h) = state.with_stream_mut(|stream| -> Result<(Vec<u8>, u32, u32)> {
            let (buf, meta) = stream.next().context("dequeue camera buffer")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, w, h, self.frame_count)
    }

    pub(super) fn stop(&mut self) {
        // Dropping the stream unmaps the buffers and closes the device node.
        if self.state.take().is_some() {
            log::info!("camera: stopped {}", self.config.device);
        }
    }

    pub(super) fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
