//! Frame and batch value types.
//!
//! - `RawFrame`: decoded RGB24 pixels as produced by capture and by `FrameCodec::decode`.
//! - `Batch`: one synchronized capture instant, one encoded frame per camera.
//!
//! A `Batch` is immutable once built. The ring buffer and every event window
//! share it through `Arc`, so padding a window with a duplicate is a pointer copy.

use anyhow::{anyhow, Result};

/// Decoded RGB24 frame.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl RawFrame {
    /// Wrap RGB24 pixels. Fails if the buffer length does not match the geometry.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Solid-color frame. Handy for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..len / 3 {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// Pixel payloads are large; keep them out of Debug output and logs.
impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero"));
    }
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

/// One synchronized capture instant across all cameras.
///
/// `frames[i]` holds the encoded bytes for camera `i`.
#[derive(Clone, PartialEq)]
pub struct Batch {
    timestamp: f64,
    frames: Vec<Vec<u8>>,
}

impl Batch {
    pub fn new(timestamp: f64, frames: Vec<Vec<u8>>) -> Self {
        Self { timestamp, frames }
    }

    /// Capture time in epoch seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn frame(&self, camera: usize) -> Option<&[u8]> {
        self.frames.get(camera).map(Vec::as_slice)
    }

    pub fn camera_count(&self) -> usize {
        self.frames.len()
    }

    /// Total encoded size, for buffer memory accounting.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("timestamp", &self.timestamp)
            .field("cameras", &self.frames.len())
            .field("bytes", &self.byte_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_validates_length() {
        assert!(RawFrame::new(vec![0u8; 12], 2, 2).is_ok());
        assert!(RawFrame::new(vec![0u8; 11], 2, 2).is_err());
        assert!(RawFrame::new(Vec::new(), 0, 2).is_err());
    }

    #[test]
    fn filled_frame_repeats_color() -> Result<()> {
        let frame = RawFrame::filled(2, 1, [1, 2, 3])?;
        assert_eq!(frame.pixels(), &[1, 2, 3, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn batch_reports_sizes() {
        let batch = Batch::new(1.5, vec![vec![0u8; 4], vec![0u8; 6]]);
        assert_eq!(batch.camera_count(), 2);
        assert_eq!(batch.byte_len(), 10);
        assert_eq!(batch.frame(1).map(<[u8]>::len), Some(6));
        assert!(batch.frame(2).is_none());
    }
}
