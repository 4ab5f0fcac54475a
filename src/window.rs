//! Event window extraction.
//!
//! Two strategies select which buffered batches make up an event:
//!
//! - `TimeBased`: every batch inside `[trigger - pre_secs, trigger + post_secs]`.
//! - `ExactCount`: exactly `round(pre_secs * fps)` batches at or before the trigger
//!   followed by exactly `round(post_secs * fps)` batches after it, padding with
//!   duplicated boundary batches where the buffer falls short.
//!
//! Exact-count output always has the same length, so every event plays back
//! for the same duration regardless of upstream arrival jitter.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::frame::Batch;

/// Batches selected for one event, in time order.
pub type Window = Vec<Arc<Batch>>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WindowMode {
    TimeBased,
    ExactCount { target_fps: f64 },
}

impl WindowMode {
    pub fn name(&self) -> &'static str {
        match self {
            WindowMode::TimeBased => "time_based",
            WindowMode::ExactCount { .. } => "exact_count",
        }
    }
}

/// Mode name without parameters, as written in config files and env vars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowModeKind {
    TimeBased,
    ExactCount,
}

impl FromStr for WindowModeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "time_based" | "time" => Ok(WindowModeKind::TimeBased),
            "exact_count" | "exact" => Ok(WindowModeKind::ExactCount),
            other => Err(anyhow!(
                "unknown window mode '{}'; expected time_based or exact_count",
                other
            )),
        }
    }
}

/// Per-side batch counts for exact-count mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCounts {
    pub pre_needed: usize,
    pub post_needed: usize,
}

impl FrameCounts {
    pub fn total(&self) -> usize {
        self.pre_needed + self.post_needed
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSpec {
    pub pre_secs: f64,
    pub post_secs: f64,
    pub mode: WindowMode,
}

impl WindowSpec {
    /// Nominal playback length of an event.
    pub fn nominal_duration(&self) -> f64 {
        self.pre_secs + self.post_secs
    }

    /// Batch counts required in exact-count mode; `None` for time-based.
    pub fn frame_counts(&self) -> Option<FrameCounts> {
        match self.mode {
            WindowMode::TimeBased => None,
            WindowMode::ExactCount { target_fps } => Some(FrameCounts {
                pre_needed: rounded_count(self.pre_secs, target_fps),
                post_needed: rounded_count(self.post_secs, target_fps),
            }),
        }
    }

    /// Select the event window from a buffer snapshot.
    ///
    /// An empty result means the event has no data and must be discarded.
    pub fn extract(&self, snapshot: &[Arc<Batch>], trigger_time: f64) -> Window {
        match self.frame_counts() {
            None => extract_time_based(snapshot, trigger_time, self.pre_secs, self.post_secs),
            Some(counts) => extract_exact_count(snapshot, trigger_time, counts),
        }
    }
}

fn rounded_count(secs: f64, fps: f64) -> usize {
    let n = (secs * fps).round();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

pub fn extract_time_based(
    snapshot: &[Arc<Batch>],
    trigger_time: f64,
    pre_secs: f64,
    post_secs: f64,
) -> Window {
    let from = trigger_time - pre_secs;
    let to = trigger_time + post_secs;
    let mut window: Window = snapshot
        .iter()
        .filter(|b| from <= b.timestamp() && b.timestamp() <= to)
        .cloned()
        .collect();
    // Arrival order should already be sorted; stable sort keeps ties in arrival order.
    window.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
    window
}

pub fn extract_exact_count(
    snapshot: &[Arc<Batch>],
    trigger_time: f64,
    counts: FrameCounts,
) -> Window {
    let (pre, post): (Vec<&Arc<Batch>>, Vec<&Arc<Batch>>) = snapshot
        .iter()
        .partition(|b| b.timestamp() <= trigger_time);

    if pre.is_empty() && post.is_empty() {
        return Vec::new();
    }

    let pad_for_pre = post.first().or(pre.last()).copied();
    let pad_for_post = pre.last().or(post.first()).copied();

    let mut window = Window::with_capacity(counts.total());

    let pre_take = pre.len().min(counts.pre_needed);
    if let Some(pad) = pad_for_pre {
        for _ in pre_take..counts.pre_needed {
            window.push(Arc::clone(pad));
        }
    }
    window.extend(pre[pre.len() - pre_take..].iter().map(|&b| Arc::clone(b)));

    let post_take = post.len().min(counts.post_needed);
    window.extend(post[..post_take].iter().map(|&b| Arc::clone(b)));
    if let Some(pad) = pad_for_post {
        for _ in post_take..counts.post_needed {
            window.push(Arc::clone(pad));
        }
    }

    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batches(timestamps: &[f64]) -> Vec<Arc<Batch>> {
        timestamps
            .iter()
            .map(|&ts| Arc::new(Batch::new(ts, vec![ts.to_le_bytes().to_vec()])))
            .collect()
    }

    fn stamps(window: &Window) -> Vec<f64> {
        window.iter().map(|b| b.timestamp()).collect()
    }

    fn exact(pre: usize, post: usize) -> FrameCounts {
        FrameCounts {
            pre_needed: pre,
            post_needed: post,
        }
    }

    #[test]
    fn frame_counts_round_to_nearest() {
        let spec = WindowSpec {
            pre_secs: 5.0,
            post_secs: 2.5,
            mode: WindowMode::ExactCount { target_fps: 5.0 },
        };
        assert_eq!(spec.frame_counts(), Some(exact(25, 13)));

        let spec = WindowSpec {
            mode: WindowMode::TimeBased,
            ..spec
        };
        assert_eq!(spec.frame_counts(), None);
    }

    #[test]
    fn time_based_selects_inclusive_bounds() {
        let snap = batches(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let window = extract_time_based(&snap, 3.0, 1.0, 2.0);
        assert_eq!(stamps(&window), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn time_based_sorts_out_of_order_input() {
        let snap = batches(&[2.0, 1.0, 3.0]);
        let window = extract_time_based(&snap, 2.0, 5.0, 5.0);
        assert_eq!(stamps(&window), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn time_based_empty_when_nothing_overlaps() {
        let snap = batches(&[0.0, 1.0]);
        assert!(extract_time_based(&snap, 10.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn exact_count_takes_nearest_on_each_side() {
        let snap = batches(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let window = extract_exact_count(&snap, 4.0, exact(2, 2));
        assert_eq!(stamps(&window), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn exact_count_pads_short_pre_with_first_post() {
        let snap = batches(&[1.0, 2.0, 3.0, 4.0]);
        let window = extract_exact_count(&snap, 1.5, exact(3, 2));
        assert_eq!(stamps(&window), vec![2.0, 2.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn exact_count_pads_short_post_with_last_pre() {
        let snap = batches(&[1.0, 2.0, 3.0, 4.0]);
        let window = extract_exact_count(&snap, 3.5, exact(2, 3));
        assert_eq!(stamps(&window), vec![2.0, 3.0, 4.0, 3.0, 3.0]);
    }

    #[test]
    fn exact_count_only_post_available() {
        let snap = batches(&[5.0, 6.0]);
        let window = extract_exact_count(&snap, 4.0, exact(2, 3));
        assert_eq!(stamps(&window), vec![5.0, 5.0, 5.0, 6.0, 5.0]);
    }

    #[test]
    fn exact_count_only_pre_available() {
        let snap = batches(&[1.0, 2.0]);
        let window = extract_exact_count(&snap, 4.0, exact(3, 2));
        assert_eq!(stamps(&window), vec![2.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn exact_count_length_is_fixed_for_any_buffer() {
        let counts = exact(4, 3);
        for len in 1..12 {
            let timestamps: Vec<f64> = (0..len).map(|i| i as f64).collect();
            let snap = batches(&timestamps);
            for trigger in [-1.0, 0.0, 2.5, 5.0, 20.0] {
                let window = extract_exact_count(&snap, trigger, counts);
                assert_eq!(window.len(), counts.total(), "len={} trigger={}", len, trigger);
            }
        }
    }

    #[test]
    fn exact_count_empty_snapshot_yields_nothing() {
        assert!(extract_exact_count(&[], 1.0, exact(2, 2)).is_empty());
    }

    #[test]
    fn padding_shares_the_boundary_batch() {
        let snap = batches(&[1.0, 5.0]);
        let window = extract_exact_count(&snap, 2.0, exact(2, 1));
        assert!(Arc::ptr_eq(&window[0], &snap[1]));
        assert!(Arc::ptr_eq(&window[1], &snap[0]));
    }

    #[test]
    fn mode_kind_parses_aliases() -> Result<()> {
        assert_eq!("exact_count".parse::<WindowModeKind>()?, WindowModeKind::ExactCount);
        assert_eq!("Time".parse::<WindowModeKind>()?, WindowModeKind::TimeBased);
        assert!("frames".parse::<WindowModeKind>().is_err());
        Ok(())
    }
}
