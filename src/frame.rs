//! Transient camera frames.
//!
//! - `Frame`: Opaque container for RGB8 pixel data. Bytes are crate-private.
//! - `FrameSize`: Width/height pair used for capture targets and overlay surfaces.
//!
//! Frames live for exactly one capture tick: the camera hands one to the encoder,
//! the encoder produces a compressed payload, and the frame is dropped. Pixel data
//! is zeroized on drop and there is no path that writes it to disk.

use anyhow::{anyhow, Result};
use std::time::Instant;
use zeroize::Zeroize;

/// Bytes per RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Width/height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of bytes an RGB8 buffer of this size occupies.
    pub fn rgb_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB_CHANNELS
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque RGB8 frame. Not `Clone`; no public byte accessor.
pub struct Frame {
    /// Private pixel data, row-major RGB8.
    pixels: Vec<u8>,
    size: FrameSize,
    /// Monotonic capture instant.
    captured_at: Instant,
    /// Per-source capture counter.
    sequence: u64,
}

impl Frame {
    /// Wrap an RGB8 buffer. Fails when the buffer length does not match the size.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let size = FrameSize::new(width, height);
        if size.is_empty() {
            return Err(anyhow!("frame size {} has a zero dimension", size));
        }
        if pixels.len() != size.rgb_len() {
            return Err(anyhow!(
                "frame buffer holds {} bytes, expected {} for {} RGB8",
                pixels.len(),
                size.rgb_len(),
                size
            ));
        }
        Ok(Self {
            pixels,
            size,
            captured_at: Instant::now(),
            sequence,
        })
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Internal: pixel access for the encoder only.
    pub(crate) fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never formatted.
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_length_mismatch() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 0).unwrap_err();
        assert!(err.to_string().contains("expected 48"));
    }

    #[test]
    fn from_rgb_rejects_zero_dimension() {
        assert!(Frame::from_rgb(Vec::new(), 0, 4, 0).is_err());
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::from_rgb(vec![7u8; 2 * 2 * 3], 2, 2, 9).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("sequence: 9"));
        assert!(!rendered.contains("pixels"));
    }

    #[test]
    fn frame_size_display() {
        assert_eq!(FrameSize::new(640, 480).to_string(), "640x480");
        assert_eq!(FrameSize::new(640, 480).rgb_len(), 640 * 480 * 3);
    }
}
