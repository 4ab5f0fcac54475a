//! FFmpeg-backed video writer (MP4 container).
//!
//! Frames arrive as RGB24, are converted to YUV420P with swscale and encoded
//! with the codec selected by the fourcc. Presentation timestamps are in
//! milliseconds so fractional frame rates keep an even cadence.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::{check_geometry, FourCc, VideoOutput, VideoWriter};
use crate::frame::RawFrame;

const TIME_BASE_DEN: i32 = 1000;

#[derive(Clone, Debug, Default)]
pub struct FfmpegVideoWriter;

impl FfmpegVideoWriter {
    pub fn new() -> Self {
        Self
    }
}

fn codec_for(tag: FourCc) -> Result<ffmpeg::codec::Id> {
    match &tag.as_bytes() {
        b"mp4v" | b"MP4V" | b"FMP4" | b"XVID" => Ok(ffmpeg::codec::Id::MPEG4),
        b"avc1" | b"H264" | b"h264" | b"X264" => Ok(ffmpeg::codec::Id::H264),
        b"MJPG" => Ok(ffmpeg::codec::Id::MJPEG),
        _ => Err(anyhow!("unsupported fourcc {} for ffmpeg writer", tag)),
    }
}

impl VideoWriter for FfmpegVideoWriter {
    fn extension(&self) -> &str {
        "mp4"
    }

    fn format_tag(&self) -> FourCc {
        FourCc::MP4V
    }

    fn open(
        &self,
        path: &Path,
        format_tag: FourCc,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoOutput>> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("invalid frame rate {}", fps));
        }
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut octx = ffmpeg::format::output(&path)
            .with_context(|| format!("open ffmpeg output {}", path.display()))?;
        let codec = ffmpeg::encoder::find(codec_for(format_tag)?)
            .ok_or_else(|| anyhow!("ffmpeg encoder for {} not available", format_tag))?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut ost = octx.add_stream(codec).context("add video stream")?;
        let stream_index = ost.index();
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(ffmpeg::Rational::new(1, TIME_BASE_DEN));
        encoder.set_frame_rate(Some(ffmpeg::Rational::from(fps)));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open().context("open video encoder")?;
        ost.set_parameters(&encoder);
        ost.set_time_base(ffmpeg::Rational::new(1, TIME_BASE_DEN));

        octx.write_header().context("write container header")?;
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("video stream missing after header"))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Box::new(FfmpegOutput {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            stream_index,
            stream_time_base,
            fps,
            width,
            height,
            frames: 0,
        }))
    }
}

struct FfmpegOutput {
    path: PathBuf,
    octx: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    stream_time_base: ffmpeg::Rational,
    fps: f64,
    width: u32,
    height: u32,
    frames: u64,
}

impl FfmpegOutput {
    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(
                ffmpeg::Rational::new(1, TIME_BASE_DEN),
                self.stream_time_base,
            );
            packet
                .write_interleaved(&mut self.octx)
                .context("write video packet")?;
        }
        Ok(())
    }
}

impl VideoOutput for FfmpegOutput {
    fn write(&mut self, frame: &RawFrame) -> Result<()> {
        check_geometry(frame, self.width, self.height)?;

        let mut rgb =
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let dst = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            dst.get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV420P")?;
        let pts = (self.frames as f64 * TIME_BASE_DEN as f64 / self.fps).round() as i64;
        yuv.set_pts(Some(pts));

        self.encoder.send_frame(&yuv).context("send frame to encoder")?;
        self.frames += 1;
        self.drain_packets()
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.octx.write_trailer().context("write container trailer")?;
        log::debug!("closed {} ({} frames)", self.path.display(), self.frames);
        Ok(())
    }
}
