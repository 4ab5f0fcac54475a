//! Blackbox event recorder.
//!
//! Continuously buffers synchronized multi-camera frames in memory and, when a
//! trigger fires, writes a bounded window around the trigger to disk.
//!
//! # Architecture
//!
//! - Ingestion threads call [`EventRecorder::push_batch`] with one raw frame
//!   per camera. Frames are resized and JPEG-encoded before the recorder lock
//!   is taken.
//! - Batches land in a [`TimedRingBuffer`] that evicts anything older than the
//!   retention horizon.
//! - [`EventRecorder::trigger`] arms a single-slot [`EventSession`]. Later
//!   batches drive it to completion, either by time or by counting post-trigger
//!   batches.
//! - On completion the window is cut from the buffer and handed to a bounded
//!   [`PersistQueue`]; one background worker writes image sequences or videos.
//!   Ingestion never blocks on disk.
//!
//! # Module Structure
//!
//! - `frame`: raw and encoded frame types
//! - `buffer`: time-bounded ring buffer of batches
//! - `session`: trigger state machine and event ids
//! - `window`: pre/post window extraction
//! - `codec`, `video`: still-image and video backends
//! - `persist`: job queue, worker and on-disk layout
//! - `recorder`: the public ingestion and control surface
//! - `ingest`: synthetic rig used by `blackboxd`
//! - `config`: file and environment configuration

use std::time::{SystemTime, UNIX_EPOCH};

pub mod buffer;
pub mod codec;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod persist;
pub mod recorder;
pub mod session;
pub mod video;
pub mod window;

pub use buffer::TimedRingBuffer;
pub use codec::{FrameCodec, JpegCodec};
pub use config::RecorderConfig;
pub use frame::{Batch, RawFrame};
pub use ingest::{RigConfig, SyntheticRig};
pub use persist::{
    EnqueueOutcome, EventManifest, OutputFormat, PersistJob, PersistQueue, PersistStats,
    MANIFEST_FILE,
};
pub use recorder::{DropReason, EventRecorder, PushOutcome};
pub use session::{ArmedEvent, EventSession};
pub use video::{FourCc, VideoOutput, VideoWriter};
pub use window::{FrameCounts, Window, WindowMode, WindowModeKind, WindowSpec};

/// Wall-clock time as fractional epoch seconds.
pub fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
