use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use super::FrameCodec;
use crate::frame::RawFrame;

/// JPEG codec backed by the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegCodec;

impl JpegCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for JpegCodec {
    fn extension(&self) -> &str {
        "jpg"
    }

    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be 1..=100, got {}", quality));
        }
        let mut out = Vec::with_capacity(frame.pixels().len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                frame.pixels(),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RawFrame> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        let (width, height) = image.dimensions();
        RawFrame::new(image.into_raw(), width, height)
    }
}
