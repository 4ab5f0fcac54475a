//! Time-indexed ring buffer of recent batches.
//!
//! Batches are kept in arrival order and evicted from the front once they are
//! older than the retention window, measured against the newest timestamp seen.
//! Timestamps are assumed non-decreasing; out-of-order arrivals stay in
//! insertion order and are not re-sorted.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::frame::Batch;

pub struct TimedRingBuffer {
    buffer: VecDeque<Arc<Batch>>,
    retention_secs: f64,
}

impl TimedRingBuffer {
    pub fn new(retention_secs: f64) -> Self {
        Self {
            buffer: VecDeque::new(),
            retention_secs,
        }
    }

    /// Append a batch and evict everything older than the retention window.
    pub fn append(&mut self, batch: Arc<Batch>) {
        let now = batch.timestamp();
        self.buffer.push_back(batch);
        self.prune(now);
    }

    /// Drop leading batches with `timestamp < now - retention_secs`.
    pub fn prune(&mut self, now: f64) -> usize {
        let cutoff = now - self.retention_secs;
        let mut evicted = 0;
        while let Some(oldest) = self.buffer.front() {
            if oldest.timestamp() < cutoff {
                self.buffer.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Copy of the current contents. Callers hold the recorder lock.
    pub fn snapshot(&self) -> Vec<Arc<Batch>> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn retention_secs(&self) -> f64 {
        self.retention_secs
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.buffer.back().map(|b| b.timestamp())
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.buffer.front().map(|b| b.timestamp())
    }

    /// Memory usage estimate (encoded bytes only).
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(|b| b.byte_len()).sum()
    }
}
