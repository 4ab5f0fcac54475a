//! Asynchronous, back-pressured event persistence.
//!
//! The recorder hands finished windows to `PersistQueue::enqueue`, which never
//! blocks: if the bounded queue is full the job is dropped and counted. A single
//! worker thread drains the queue and performs all disk and codec I/O, so a slow
//! disk can never stall frame ingestion.
//!
//! Shutdown is best-effort. `close` waits a bounded time for queued jobs to be
//! written and then abandons whatever is left.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod writer;

pub use writer::{
    demux, frame_file_name, video_fps, EventManifest, JobWriter, OutputFormat, PersistJob,
    MANIFEST_FILE, MAX_VIDEO_FPS, MIN_VIDEO_FPS,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue at capacity; the job was discarded.
    Full,
    /// Queue already shut down; the job was discarded.
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub written: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    stop: AtomicBool,
    pending: AtomicUsize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    done: Receiver<()>,
}

pub struct PersistQueue {
    tx: SyncSender<PersistJob>,
    counters: Arc<Counters>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl PersistQueue {
    /// Start the worker thread.
    pub fn spawn(writer: JobWriter, capacity: usize, poll_interval: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("persist queue capacity must be at least 1"));
        }
        let (tx, rx) = mpsc::sync_channel(capacity);
        let (done_tx, done_rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("blackbox-persist".to_string())
            .spawn(move || {
                run_worker(rx, writer, worker_counters, poll_interval);
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            tx,
            counters,
            worker: Mutex::new(Some(WorkerHandle {
                join,
                done: done_rx,
            })),
        })
    }

    /// Hand a job to the worker without blocking.
    pub fn enqueue(&self, job: PersistJob) -> EnqueueOutcome {
        if self.counters.stop.load(Ordering::SeqCst) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("persist queue closed; dropping event {}", job.event_id);
            return EnqueueOutcome::Closed;
        }
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(job)) => {
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "persist queue full; dropping event {} ({} frames)",
                    job.event_id,
                    job.window.len()
                );
                EnqueueOutcome::Full
            }
            Err(TrySendError::Disconnected(job)) => {
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("persist worker gone; dropping event {}", job.event_id);
                EnqueueOutcome::Closed
            }
        }
    }

    /// Jobs queued or in progress.
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker, waiting up to `wait` for queued jobs to be written.
    ///
    /// Returns true once nothing is left to write. If jobs are still queued
    /// when `wait` runs out, they are left to the worker and false is returned;
    /// a later call waits again. A `wait` too large to represent as a deadline
    /// waits without bound.
    pub fn close(&self, wait: Duration) -> bool {
        self.counters.stop.store(true, Ordering::SeqCst);
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(handle) = worker.take() else {
            return true;
        };

        let deadline = Instant::now().checked_add(wait);
        while self.pending() > 0 {
            let step = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    DRAIN_POLL.min(left)
                }
                None => DRAIN_POLL,
            };
            std::thread::sleep(step);
        }

        let finished = match deadline {
            Some(deadline) => handle
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => handle
                .done
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match finished {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join.join().is_err() {
                    log::error!("persist worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                let pending = self.pending();
                if pending == 0 {
                    // Idle worker parked in its poll; it exits on its own.
                    log::debug!("persist worker idle at close; detaching");
                    return true;
                }
                log::warn!(
                    "persist worker still busy after {:?}; {} queued event(s) not yet written",
                    wait,
                    pending
                );
                *worker = Some(handle);
                false
            }
        }
    }
}

fn run_worker(
    rx: Receiver<PersistJob>,
    writer: JobWriter,
    counters: Arc<Counters>,
    poll_interval: Duration,
) {
    loop {
        if counters.stop.load(Ordering::SeqCst) && counters.pending.load(Ordering::SeqCst) == 0 {
            break;
        }
        let job = match rx.recv_timeout(poll_interval) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| writer.write(&job)));
        match result {
            Ok(Ok(manifest)) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "saved event {} to {} (frames={}, format={:?}, {:.0?})",
                    manifest.event_id,
                    job.output_dir.display(),
                    manifest.frame_count,
                    manifest.format,
                    started.elapsed()
                );
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("failed to save event {}: {:#}", job.event_id, err);
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("failed to save event {}: writer panicked", job.event_id);
            }
        }
        counters.pending.fetch_sub(1, Ordering::SeqCst);
    }
    log::debug!("persist worker stopped");
}
