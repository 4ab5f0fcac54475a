//! Sequential video output capability.
//!
//! A `VideoWriter` opens one `VideoOutput` per camera per event. Outputs accept
//! frames of exactly the opened geometry, in order, and are finished by `close`.
//!
//! Backends:
//! - `MjpegWriter`: MJPEG elementary stream (always available)
//! - `FfmpegVideoWriter`: MPEG-4 in MP4 (feature: video-ffmpeg)

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::frame::RawFrame;

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;
mod mjpeg;

#[cfg(feature = "video-ffmpeg")]
pub use ffmpeg::FfmpegVideoWriter;
pub use mjpeg::MjpegWriter;

/// Four-character container/codec tag, e.g. `mp4v` or `MJPG`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const MP4V: FourCc = FourCc(*b"mp4v");

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl FromStr for FourCc {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(anyhow!("fourcc must be 4 printable ASCII characters, got '{}'", s));
        }
        Ok(FourCc([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

pub trait VideoWriter: Send + Sync {
    /// File extension (without dot) for outputs of this writer.
    fn extension(&self) -> &str;

    /// Tag used when the caller does not request one.
    fn format_tag(&self) -> FourCc;

    fn open(
        &self,
        path: &Path,
        format_tag: FourCc,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoOutput>>;
}

pub trait VideoOutput: Send {
    fn write(&mut self, frame: &RawFrame) -> Result<()>;

    /// Flush and finish the file.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Reject frames whose size differs from what the output was opened with.
pub(crate) fn check_geometry(frame: &RawFrame, width: u32, height: u32) -> Result<()> {
    if frame.dimensions() != (width, height) {
        return Err(anyhow!(
            "frame geometry {}x{} does not match video {}x{}",
            frame.width,
            frame.height,
            width,
            height
        ));
    }
    Ok(())
}
