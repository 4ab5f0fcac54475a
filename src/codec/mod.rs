//! Per-frame codec capability.
//!
//! The recorder only ever stores encoded bytes. It calls `encode` once per
//! frame on ingestion (after resizing to the configured size) and `decode`
//! once per frame when rendering video output.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::RawFrame;

mod jpeg;

pub use jpeg::JpegCodec;

pub trait FrameCodec: Send + Sync {
    /// File extension (without dot) for a single encoded frame.
    fn extension(&self) -> &str;

    /// Encode a frame. `quality` is 1..=100.
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<RawFrame>;
}

/// Resize to the given geometry. Frames already at that size pass through untouched.
pub fn resize_to(frame: RawFrame, width: u32, height: u32) -> Result<RawFrame> {
    if frame.dimensions() == (width, height) {
        return Ok(frame);
    }
    let (src_w, src_h) = frame.dimensions();
    let src = RgbImage::from_raw(src_w, src_h, frame.into_pixels())
        .ok_or_else(|| anyhow!("frame buffer too small for {}x{}", src_w, src_h))?;
    let resized = imageops::resize(&src, width, height, FilterType::Triangle);
    RawFrame::new(resized.into_raw(), width, height)
}
