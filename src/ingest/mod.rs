//! Frame ingestion sources.
//!
//! Sources produce one `RawFrame` per camera per tick; the daemon pushes each
//! tick into the recorder as a batch. Only the synthetic `stub://` rig ships
//! here. Real capture stays outside the crate and talks to
//! `EventRecorder::push_batch` directly.

pub mod synthetic;

pub use synthetic::{RigConfig, RigStats, SyntheticRig};
