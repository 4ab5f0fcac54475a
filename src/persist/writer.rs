//! Event artifact writers.
//!
//! A job's window is split into one ordered `(timestamp, bytes)` stream per
//! camera and written either as numbered still images or as one video per
//! camera. `event.json` is written last, so its presence means every artifact
//! for the event was produced.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::codec::FrameCodec;
use crate::video::{FourCc, VideoWriter};
use crate::window::Window;

pub const MANIFEST_FILE: &str = "event.json";
pub const MIN_VIDEO_FPS: f64 = 1.0;
pub const MAX_VIDEO_FPS: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    ImageSequence,
    Video,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "images" | "image_sequence" => Ok(OutputFormat::ImageSequence),
            "video" | "mp4" | "mjpeg" => Ok(OutputFormat::Video),
            other => Err(anyhow!(
                "unknown output format '{}'; expected jpg or video",
                other
            )),
        }
    }
}

/// Unit of work handed from the recorder to the persistence worker.
#[derive(Debug)]
pub struct PersistJob {
    pub event_id: String,
    pub tag: String,
    pub trigger_time: f64,
    pub window_mode: &'static str,
    pub window: Window,
    pub output_dir: PathBuf,
}

/// Summary written next to the artifacts of every persisted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventManifest {
    pub event_id: String,
    pub tag: String,
    pub trigger_time: f64,
    pub window_mode: String,
    pub cameras: usize,
    pub frame_count: usize,
    pub format: OutputFormat,
    pub video_fps: Option<f64>,
    pub timestamps: Vec<f64>,
}

/// Playback rate that stretches `frame_count` frames over the nominal event length.
pub fn video_fps(frame_count: usize, nominal_duration: f64) -> f64 {
    let raw = frame_count as f64 / nominal_duration;
    if raw.is_nan() {
        return MIN_VIDEO_FPS;
    }
    raw.clamp(MIN_VIDEO_FPS, MAX_VIDEO_FPS)
}

/// `<seq:04>_<timestamp ms>.<ext>`
pub fn frame_file_name(seq: usize, timestamp: f64, extension: &str) -> String {
    format!("{:04}_{}.{}", seq, (timestamp * 1000.0) as i64, extension)
}

/// Split a window into per-camera `(timestamp, encoded frame)` streams.
pub fn demux(window: &Window, cameras: usize) -> Result<Vec<Vec<(f64, &[u8])>>> {
    let mut streams: Vec<Vec<(f64, &[u8])>> = (0..cameras)
        .map(|_| Vec::with_capacity(window.len()))
        .collect();
    for batch in window {
        for (cam, stream) in streams.iter_mut().enumerate() {
            let frame = batch.frame(cam).ok_or_else(|| {
                anyhow!(
                    "batch at {} has {} cameras, expected {}",
                    batch.timestamp(),
                    batch.camera_count(),
                    cameras
                )
            })?;
            stream.push((batch.timestamp(), frame));
        }
    }
    Ok(streams)
}

pub struct JobWriter {
    codec: Arc<dyn FrameCodec>,
    video: Arc<dyn VideoWriter>,
    format: OutputFormat,
    fourcc: FourCc,
    cameras: usize,
    nominal_duration: f64,
}

impl JobWriter {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        video: Arc<dyn VideoWriter>,
        format: OutputFormat,
        fourcc: Option<FourCc>,
        cameras: usize,
        nominal_duration: f64,
    ) -> Self {
        let fourcc = fourcc.unwrap_or_else(|| video.format_tag());
        Self {
            codec,
            video,
            format,
            fourcc,
            cameras,
            nominal_duration,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn write(&self, job: &PersistJob) -> Result<EventManifest> {
        fs::create_dir_all(&job.output_dir)
            .with_context(|| format!("create event dir {}", job.output_dir.display()))?;

        let streams = demux(&job.window, self.cameras)?;
        let video_fps = match self.format {
            OutputFormat::ImageSequence => {
                for (cam, stream) in streams.iter().enumerate() {
                    self.write_images(&job.output_dir, cam, stream)?;
                }
                None
            }
            OutputFormat::Video => {
                let fps = video_fps(job.window.len(), self.nominal_duration);
                for (cam, stream) in streams.iter().enumerate() {
                    self.write_video(&job.output_dir, cam, stream, fps)?;
                }
                Some(fps)
            }
        };

        let manifest = EventManifest {
            event_id: job.event_id.clone(),
            tag: job.tag.clone(),
            trigger_time: job.trigger_time,
            window_mode: job.window_mode.to_string(),
            cameras: self.cameras,
            frame_count: job.window.len(),
            format: self.format,
            video_fps,
            timestamps: job.window.iter().map(|b| b.timestamp()).collect(),
        };
        let encoded = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&job.output_dir.join(MANIFEST_FILE), &encoded)?;
        Ok(manifest)
    }

    fn write_images(&self, event_dir: &Path, cam: usize, stream: &[(f64, &[u8])]) -> Result<()> {
        let cam_dir = event_dir.join(format!("cam{}", cam));
        fs::create_dir_all(&cam_dir)
            .with_context(|| format!("create camera dir {}", cam_dir.display()))?;
        for (seq, (ts, bytes)) in stream.iter().enumerate() {
            let path = cam_dir.join(frame_file_name(seq, *ts, self.codec.extension()));
            fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }

    fn write_video(
        &self,
        event_dir: &Path,
        cam: usize,
        stream: &[(f64, &[u8])],
        fps: f64,
    ) -> Result<()> {
        let Some((_, first)) = stream.first() else {
            return Ok(());
        };
        let first = self
            .codec
            .decode(first)
            .with_context(|| format!("decode first frame of cam{}", cam))?;
        let path = event_dir.join(format!("cam{}.{}", cam, self.video.extension()));
        let mut output = self
            .video
            .open(&path, self.fourcc, fps, first.width, first.height)
            .with_context(|| format!("open video writer {}", path.display()))?;
        output.write(&first)?;
        for (_, bytes) in &stream[1..] {
            let frame = self.codec.decode(bytes)?;
            output.write(&frame)?;
        }
        output.close()
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;
    use crate::frame::{Batch, RawFrame};
    use crate::video::MjpegWriter;

    fn window_of(codec: &JpegCodec, timestamps: &[f64], cameras: usize) -> Result<Window> {
        let frame = RawFrame::filled(16, 8, [40, 80, 120])?;
        let bytes = codec.encode(&frame, 80)?;
        Ok(timestamps
            .iter()
            .map(|&ts| Arc::new(Batch::new(ts, vec![bytes.clone(); cameras])))
            .collect())
    }

    fn job(dir: &Path, window: Window) -> PersistJob {
        PersistJob {
            event_id: "20240101_000000_test".to_string(),
            tag: "test".to_string(),
            trigger_time: 100.0,
            window_mode: "time_based",
            window,
            output_dir: dir.join("20240101_000000_test"),
        }
    }

    #[test]
    fn fps_is_clamped() {
        assert_eq!(video_fps(30, 10.0), 3.0);
        assert_eq!(video_fps(5, 10.0), 1.0);
        assert_eq!(video_fps(1000, 10.0), 30.0);
        assert_eq!(video_fps(0, 0.0), 1.0);
    }

    #[test]
    fn file_name_encodes_sequence_and_millis() {
        assert_eq!(frame_file_name(7, 1700000000.1234, "jpg"), "0007_1700000000123.jpg");
    }

    #[test]
    fn demux_rejects_short_batches() {
        let window: Window = vec![Arc::new(Batch::new(1.0, vec![vec![1]]))];
        assert!(demux(&window, 2).is_err());
    }

    #[test]
    fn format_parses_aliases() -> Result<()> {
        assert_eq!("jpg".parse::<OutputFormat>()?, OutputFormat::ImageSequence);
        assert_eq!("MP4".parse::<OutputFormat>()?, OutputFormat::Video);
        assert!("gif".parse::<OutputFormat>().is_err());
        Ok(())
    }

    #[test]
    fn image_sequence_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = JpegCodec::new();
        let window = window_of(&codec, &[99.5, 100.25], 2)?;
        let writer = JobWriter::new(
            Arc::new(codec),
            Arc::new(MjpegWriter::default()),
            OutputFormat::ImageSequence,
            None,
            2,
            10.0,
        );
        let job = job(dir.path(), window);
        let manifest = writer.write(&job)?;

        for cam in 0..2 {
            let cam_dir = job.output_dir.join(format!("cam{}", cam));
            assert!(cam_dir.join("0000_99500.jpg").is_file());
            assert!(cam_dir.join("0001_100250.jpg").is_file());
        }
        assert_eq!(manifest.frame_count, 2);
        assert_eq!(manifest.video_fps, None);

        let stored: EventManifest =
            serde_json::from_slice(&fs::read(job.output_dir.join(MANIFEST_FILE))?)?;
        assert_eq!(stored, manifest);
        Ok(())
    }

    #[test]
    fn video_layout_and_rate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = JpegCodec::new();
        let timestamps: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let window = window_of(&codec, &timestamps, 3)?;
        let writer = JobWriter::new(
            Arc::new(codec),
            Arc::new(MjpegWriter::default()),
            OutputFormat::Video,
            None,
            3,
            10.0,
        );
        let job = job(dir.path(), window);
        let manifest = writer.write(&job)?;

        assert_eq!(manifest.video_fps, Some(3.0));
        for cam in 0..3 {
            assert!(job.output_dir.join(format!("cam{}.mjpeg", cam)).is_file());
        }
        Ok(())
    }

    #[test]
    fn corrupt_frame_fails_video_job() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let window: Window = vec![Arc::new(Batch::new(1.0, vec![b"garbage".to_vec()]))];
        let writer = JobWriter::new(
            Arc::new(JpegCodec::new()),
            Arc::new(MjpegWriter::default()),
            OutputFormat::Video,
            None,
            1,
            10.0,
        );
        let job = job(dir.path(), window);
        assert!(writer.write(&job).is_err());
        assert!(!job.output_dir.join(MANIFEST_FILE).exists());
        Ok(())
    }
}
