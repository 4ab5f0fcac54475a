//! Event recorder: ingestion and control surface.
//!
//! `EventRecorder` owns the ring buffer, the event session and the persistence
//! queue. Buffer and session live behind one mutex; appending a batch, testing
//! the armed event for completion, extracting its window and enqueueing the
//! persist job all happen inside a single critical section. Enqueueing never
//! blocks, so holding the lock across it cannot stall on disk I/O.
//!
//! Frame encoding happens before the lock is taken.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::buffer::TimedRingBuffer;
use crate::codec::{resize_to, FrameCodec, JpegCodec};
use crate::config::RecorderConfig;
use crate::frame::{Batch, RawFrame};
use crate::persist::{EnqueueOutcome, JobWriter, PersistJob, PersistQueue, PersistStats};
use crate::session::{self, ArmedEvent, EventSession};
use crate::video::VideoWriter;
use crate::window::WindowSpec;

/// What happened to a pushed batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered; no event completed.
    Buffered,
    /// Buffered, and it completed the armed event, which was queued for writing.
    Finalized { event_id: String, frames: usize },
    /// Buffered, and it completed the armed event, but no buffered data overlapped the window.
    Discarded { event_id: String },
    /// Buffered, and it completed the armed event, but the persist queue rejected the job.
    QueueFull { event_id: String },
    /// Not buffered.
    Dropped(DropReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    WrongFrameCount { expected: usize, got: usize },
    EncodeFailed { camera: usize },
    /// NaN or infinite capture time.
    InvalidTimestamp,
}

struct RecorderState {
    buffer: TimedRingBuffer,
    session: EventSession,
}

pub struct EventRecorder {
    state: Mutex<RecorderState>,
    codec: Arc<dyn FrameCodec>,
    queue: PersistQueue,
    spec: WindowSpec,
    cameras: usize,
    frame_width: u32,
    frame_height: u32,
    quality: u8,
    output_dir: PathBuf,
    shutdown_wait: Duration,
}

/// Video backend used when none is supplied.
#[cfg(feature = "video-ffmpeg")]
pub fn default_video_writer() -> Arc<dyn VideoWriter> {
    Arc::new(crate::video::FfmpegVideoWriter::new())
}

/// Video backend used when none is supplied.
#[cfg(not(feature = "video-ffmpeg"))]
pub fn default_video_writer() -> Arc<dyn VideoWriter> {
    Arc::new(crate::video::MjpegWriter::default())
}

impl EventRecorder {
    /// Recorder with the JPEG codec and the default video backend.
    pub fn from_config(cfg: &RecorderConfig) -> Result<Self> {
        Self::new(cfg, Arc::new(JpegCodec::new()), default_video_writer())
    }

    pub fn new(
        cfg: &RecorderConfig,
        codec: Arc<dyn FrameCodec>,
        video: Arc<dyn VideoWriter>,
    ) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(&cfg.output_dir)?;
        let spec = cfg.window_spec();
        let writer = JobWriter::new(
            codec.clone(),
            video,
            cfg.output.format,
            cfg.output.fourcc,
            cfg.cameras,
            spec.nominal_duration(),
        );
        let queue = PersistQueue::spawn(writer, cfg.queue.capacity, cfg.queue.poll_interval)?;
        log::info!(
            "recorder ready: cameras={} mode={} pre={}s post={}s retention={}s output={}",
            cfg.cameras,
            spec.mode.name(),
            spec.pre_secs,
            spec.post_secs,
            cfg.retention_secs,
            cfg.output_dir.display()
        );
        Ok(Self {
            state: Mutex::new(RecorderState {
                buffer: TimedRingBuffer::new(cfg.retention_secs),
                session: EventSession::default(),
            }),
            codec,
            queue,
            spec,
            cameras: cfg.cameras,
            frame_width: cfg.frame.width,
            frame_height: cfg.frame.height,
            quality: cfg.frame.quality,
            output_dir: cfg.output_dir.clone(),
            shutdown_wait: cfg.shutdown_wait,
        })
    }

    /// Resize, encode and buffer one frame per camera.
    ///
    /// `timestamp` defaults to the current wall-clock time. Batches with the
    /// wrong number of frames, a non-finite timestamp, or any frame that fails
    /// to encode are dropped.
    pub fn push_batch(&self, frames: Vec<RawFrame>, timestamp: Option<f64>) -> PushOutcome {
        let timestamp = timestamp.unwrap_or_else(crate::now_s);
        if !timestamp.is_finite() {
            return self.drop_batch(DropReason::InvalidTimestamp);
        }
        if frames.len() != self.cameras {
            return self.drop_batch(DropReason::WrongFrameCount {
                expected: self.cameras,
                got: frames.len(),
            });
        }

        let mut encoded = Vec::with_capacity(frames.len());
        for (camera, frame) in frames.into_iter().enumerate() {
            let bytes = resize_to(frame, self.frame_width, self.frame_height)
                .and_then(|frame| self.codec.encode(&frame, self.quality));
            match bytes {
                Ok(bytes) => encoded.push(bytes),
                Err(err) => {
                    log::debug!("camera {} frame failed to encode: {:#}", camera, err);
                    return self.drop_batch(DropReason::EncodeFailed { camera });
                }
            }
        }

        self.ingest(Batch::new(timestamp, encoded))
    }

    /// Buffer a batch whose frames are already encoded.
    pub fn push_encoded(&self, batch: Batch) -> PushOutcome {
        if !batch.timestamp().is_finite() {
            return self.drop_batch(DropReason::InvalidTimestamp);
        }
        if batch.camera_count() != self.cameras {
            return self.drop_batch(DropReason::WrongFrameCount {
                expected: self.cameras,
                got: batch.camera_count(),
            });
        }
        self.ingest(batch)
    }

    /// Arm an event at the current time. Returns `None` if one is already in flight.
    pub fn trigger(&self, tag: &str) -> Option<String> {
        self.trigger_at(tag, crate::now_s())
    }

    /// Arm an event at an explicit trigger time (epoch seconds).
    pub fn trigger_at(&self, tag: &str, trigger_time: f64) -> Option<String> {
        if !trigger_time.is_finite() {
            log::warn!("trigger ignored: invalid trigger time {}", trigger_time);
            return None;
        }
        let mut state = self.lock_state();
        if let Some(current) = state.session.armed() {
            log::debug!(
                "trigger ignored: event {} still collecting",
                current.event_id
            );
            return None;
        }
        let event_id = session::event_id(local_time(trigger_time), tag);
        let armed = state
            .session
            .trigger(&self.spec, trigger_time, event_id, tag)?;
        match armed.frame_counts() {
            Some(counts) => log::info!(
                "event {} armed (pre_needed={}, post_needed={})",
                armed.event_id,
                counts.pre_needed,
                counts.post_needed
            ),
            None => log::info!("event {} armed", armed.event_id),
        }
        Some(armed.event_id.clone())
    }

    /// Graceful shutdown; see `PersistQueue::close`.
    pub fn close(&self, wait: Duration) -> bool {
        let stats = self.queue.stats();
        log::info!(
            "closing recorder (pending={}, written={}, dropped={}, failed={})",
            self.queue.pending(),
            stats.written,
            stats.dropped,
            stats.failed
        );
        self.queue.close(wait)
    }

    /// Shut down with the configured wait.
    pub fn close_default(&self) -> bool {
        self.close(self.shutdown_wait)
    }

    pub fn is_armed(&self) -> bool {
        self.lock_state().session.is_armed()
    }

    pub fn armed_event(&self) -> Option<ArmedEvent> {
        self.lock_state().session.armed().cloned()
    }

    pub fn buffered_len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.lock_state().buffer.memory_bytes()
    }

    pub fn persist_stats(&self) -> PersistStats {
        self.queue.stats()
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.pending()
    }

    pub fn window_spec(&self) -> WindowSpec {
        self.spec
    }

    fn ingest(&self, batch: Batch) -> PushOutcome {
        let timestamp = batch.timestamp();
        let mut state = self.lock_state();
        state.buffer.append(Arc::new(batch));
        match state.session.observe(timestamp) {
            Some(event) => self.finalize_locked(&state, event),
            None => PushOutcome::Buffered,
        }
    }

    /// Extract the window for a completed event and hand it to the worker.
    ///
    /// The caller holds the state lock, and the session is already back to Idle.
    fn finalize_locked(&self, state: &RecorderState, event: ArmedEvent) -> PushOutcome {
        let window = self
            .spec
            .extract(&state.buffer.snapshot(), event.trigger_time);
        if window.is_empty() {
            log::info!("event {} discarded: no buffered frames in window", event.event_id);
            return PushOutcome::Discarded {
                event_id: event.event_id,
            };
        }

        let frames = window.len();
        let ArmedEvent {
            event_id,
            tag,
            trigger_time,
            ..
        } = event;
        let job = PersistJob {
            output_dir: self.output_dir.join(&event_id),
            event_id: event_id.clone(),
            tag,
            trigger_time,
            window_mode: self.spec.mode.name(),
            window,
        };
        match self.queue.enqueue(job) {
            EnqueueOutcome::Queued => {
                log::info!("event {} finalized (frames={})", event_id, frames);
                PushOutcome::Finalized { event_id, frames }
            }
            EnqueueOutcome::Full | EnqueueOutcome::Closed => PushOutcome::QueueFull { event_id },
        }
    }

    fn drop_batch(&self, reason: DropReason) -> PushOutcome {
        log::debug!("batch dropped: {:?}", reason);
        PushOutcome::Dropped(reason)
    }

    fn lock_state(&self) -> MutexGuard<'_, RecorderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("recorder state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.queue.close(Duration::ZERO);
    }
}

fn local_time(epoch_secs: f64) -> chrono::DateTime<chrono::Local> {
    let secs = epoch_secs.floor();
    let nanos = ((epoch_secs - secs) * 1e9) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|utc| utc.with_timezone(&chrono::Local))
        .unwrap_or_else(chrono::Local::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowModeKind;

    fn config(dir: &std::path::Path, cameras: usize) -> RecorderConfig {
        let mut cfg = RecorderConfig::default();
        cfg.output_dir = dir.to_path_buf();
        cfg.cameras = cameras;
        cfg.frame.width = 8;
        cfg.frame.height = 8;
        cfg.window.pre_secs = 1.0;
        cfg.window.post_secs = 1.0;
        cfg.retention_secs = 10.0;
        cfg.queue.poll_interval = Duration::from_millis(10);
        cfg
    }

    fn frames(n: usize) -> Vec<RawFrame> {
        (0..n)
            .map(|_| RawFrame::filled(16, 16, [10, 20, 30]).expect("frame"))
            .collect()
    }

    #[test]
    fn wrong_frame_count_is_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = EventRecorder::from_config(&config(dir.path(), 3))?;
        let outcome = recorder.push_batch(frames(2), Some(1.0));
        assert_eq!(
            outcome,
            PushOutcome::Dropped(DropReason::WrongFrameCount {
                expected: 3,
                got: 2
            })
        );
        assert_eq!(recorder.buffered_len(), 0);
        Ok(())
    }

    #[test]
    fn push_resizes_and_buffers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = EventRecorder::from_config(&config(dir.path(), 2))?;
        assert_eq!(recorder.push_batch(frames(2), Some(1.0)), PushOutcome::Buffered);
        assert_eq!(recorder.buffered_len(), 1);
        assert!(recorder.buffered_bytes() > 0);
        Ok(())
    }

    #[test]
    fn empty_window_resets_session() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = EventRecorder::from_config(&config(dir.path(), 1))?;
        recorder.trigger_at("", 100.0).expect("armed");
        // The only batch lands past the post window, so nothing overlaps.
        let outcome = recorder.push_batch(frames(1), Some(105.0));
        assert!(matches!(outcome, PushOutcome::Discarded { .. }));
        assert!(!recorder.is_armed());
        assert_eq!(recorder.persist_stats().enqueued, 0);
        Ok(())
    }

    #[test]
    fn exact_count_event_completes_after_post_batches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config(dir.path(), 1);
        cfg.window.mode = WindowModeKind::ExactCount;
        cfg.window.target_fps = 2.0;
        let recorder = EventRecorder::from_config(&cfg)?;

        recorder.push_batch(frames(1), Some(9.5));
        recorder.trigger_at("x", 10.0).expect("armed");
        assert_eq!(recorder.push_batch(frames(1), Some(10.5)), PushOutcome::Buffered);
        match recorder.push_batch(frames(1), Some(11.0)) {
            PushOutcome::Finalized { frames, event_id } => {
                assert_eq!(frames, 4);
                assert!(event_id.ends_with("_x"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(recorder.close(Duration::from_secs(5)));
        assert_eq!(recorder.persist_stats().written, 1);
        Ok(())
    }

    #[test]
    fn non_finite_timestamps_are_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config(dir.path(), 1);
        cfg.retention_secs = 10.0;
        let recorder = EventRecorder::from_config(&cfg)?;

        let outcome = recorder.push_encoded(Batch::new(f64::NAN, vec![vec![1u8]]));
        assert_eq!(outcome, PushOutcome::Dropped(DropReason::InvalidTimestamp));
        assert_eq!(
            recorder.push_batch(frames(1), Some(f64::INFINITY)),
            PushOutcome::Dropped(DropReason::InvalidTimestamp)
        );
        assert_eq!(recorder.buffered_len(), 0);

        // Eviction keeps working after the rejected batches.
        for i in 0..1000 {
            recorder.push_encoded(Batch::new(i as f64, vec![vec![1u8]]));
        }
        assert_eq!(recorder.buffered_len(), 11);
        Ok(())
    }

    #[test]
    fn non_finite_trigger_time_is_ignored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = EventRecorder::from_config(&config(dir.path(), 1))?;
        assert_eq!(recorder.trigger_at("x", f64::NAN), None);
        assert!(!recorder.is_armed());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let mut cfg = config(dir.path(), 1);
        cfg.queue.poll_interval = Duration::ZERO;
        assert!(EventRecorder::from_config(&cfg).is_err());

        let mut cfg = config(dir.path(), 1);
        cfg.frame.quality = 0;
        assert!(EventRecorder::from_config(&cfg).is_err());

        let mut cfg = config(dir.path(), 1);
        cfg.retention_secs = f64::NAN;
        assert!(EventRecorder::from_config(&cfg).is_err());
        Ok(())
    }

    #[test]
    fn local_time_matches_epoch() {
        let t = local_time(0.5);
        assert_eq!(t.timestamp(), 0);
        assert_eq!(t.timestamp_subsec_millis(), 500);
    }
}
