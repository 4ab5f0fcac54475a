//! MJPEG elementary-stream writer.
//!
//! Each frame is re-encoded as a baseline JPEG and appended to a single file.
//! The stream carries no timing; the frame rate is recorded in the event
//! manifest and can be supplied to players (`ffplay -framerate <fps>`).

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{check_geometry, FourCc, VideoOutput, VideoWriter};
use crate::codec::{FrameCodec, JpegCodec};
use crate::frame::RawFrame;

const DEFAULT_QUALITY: u8 = 85;

#[derive(Clone, Debug)]
pub struct MjpegWriter {
    quality: u8,
}

impl MjpegWriter {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for MjpegWriter {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl VideoWriter for MjpegWriter {
    fn extension(&self) -> &str {
        "mjpeg"
    }

    fn format_tag(&self) -> FourCc {
        FourCc::MJPG
    }

    fn open(
        &self,
        path: &Path,
        format_tag: FourCc,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoOutput>> {
        if format_tag != FourCc::MJPG {
            log::debug!(
                "mjpeg writer ignores requested fourcc {} for {}",
                format_tag,
                path.display()
            );
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("invalid frame rate {}", fps));
        }
        let file = File::create(path)
            .with_context(|| format!("create video file {}", path.display()))?;
        Ok(Box::new(MjpegOutput {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            codec: JpegCodec::new(),
            quality: self.quality,
            width,
            height,
            frames: 0,
        }))
    }
}

struct MjpegOutput {
    path: PathBuf,
    out: BufWriter<File>,
    codec: JpegCodec,
    quality: u8,
    width: u32,
    height: u32,
    frames: u64,
}

impl VideoOutput for MjpegOutput {
    fn write(&mut self, frame: &RawFrame) -> Result<()> {
        check_geometry(frame, self.width, self.height)?;
        let jpeg = self.codec.encode(frame, self.quality)?;
        self.out
            .write_all(&jpeg)
            .with_context(|| format!("write frame to {}", self.path.display()))?;
        self.frames += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let MjpegOutput {
            path, out, frames, ..
        } = *self;
        let file = out
            .into_inner()
            .map_err(|e| anyhow!("flush {}: {}", path.display(), e.error()))?;
        file.sync_all()?;
        log::debug!("closed {} ({} frames)", path.display(), frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_concatenated_jpegs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cam0.mjpeg");
        let writer = MjpegWriter::default();
        let mut output = writer.open(&path, FourCc::MJPG, 3.0, 16, 8)?;
        let frame = RawFrame::filled(16, 8, [0, 128, 255])?;
        output.write(&frame)?;
        output.write(&frame)?;
        output.close()?;

        let single = JpegCodec::new().encode(&frame, DEFAULT_QUALITY)?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), single.len() * 2);
        assert_eq!(&bytes[..single.len()], single.as_slice());
        Ok(())
    }

    #[test]
    fn rejects_mismatched_geometry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = MjpegWriter::default();
        let mut output = writer.open(&dir.path().join("cam0.mjpeg"), FourCc::MJPG, 3.0, 16, 8)?;
        let frame = RawFrame::filled(8, 8, [0, 0, 0])?;
        assert!(output.write(&frame).is_err());
        Ok(())
    }

    #[test]
    fn rejects_zero_fps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = MjpegWriter::default();
        assert!(writer
            .open(&dir.path().join("cam0.mjpeg"), FourCc::MJPG, 0.0, 16, 8)
            .is_err());
        Ok(())
    }
}
