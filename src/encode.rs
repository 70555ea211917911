//! Frame downsampling and JPEG/base64 encoding.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageBuffer, Rgb};

use crate::frame::{Frame, FrameSize};

pub const DEFAULT_CAPTURE_SIZE: FrameSize = FrameSize::new(640, 480);
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Compressed, transport-ready frame payload.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    /// Base64 (standard alphabet, padded) JPEG bytes.
    pub data: String,
    pub size: FrameSize,
    /// JPEG size before base64 expansion.
    pub jpeg_bytes: usize,
    pub sequence: u64,
}

/// Downsamples frames to a fixed capture size and encodes them at a fixed quality.
#[derive(Clone, Debug)]
pub struct FrameEncoder {
    target: FrameSize,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(target: FrameSize, quality: u8) -> Result<Self> {
        if target.is_empty() {
            return Err(anyhow!("capture size {} has a zero dimension", target));
        }
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100, got {}", quality));
        }
        Ok(Self { target, quality })
    }

    pub fn target(&self) -> FrameSize {
        self.target
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame> {
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width(), frame.height(), frame.pixels())
                .ok_or_else(|| anyhow!("frame buffer does not match {}", frame.size()))?;

        let mut jpeg = Vec::with_capacity(32 * 1024);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        if frame.size() == self.target {
            encoder
                .encode(
                    frame.pixels(),
                    self.target.width,
                    self.target.height,
                    ExtendedColorType::Rgb8,
                )
                .context("encode jpeg")?;
        } else {
            let resized = imageops::resize(
                &source,
                self.target.width,
                self.target.height,
                FilterType::Triangle,
            );
            encoder
                .encode(
                    resized.as_raw(),
                    self.target.width,
                    self.target.height,
                    ExtendedColorType::Rgb8,
                )
                .context("encode downsampled jpeg")?;
        }

        Ok(EncodedFrame {
            data: BASE64_STANDARD.encode(&jpeg),
            size: self.target,
            jpeg_bytes: jpeg.len(),
            sequence: frame.sequence(),
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            target: DEFAULT_CAPTURE_SIZE,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}
