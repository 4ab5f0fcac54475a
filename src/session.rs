//! Single-slot event session.
//!
//! `Idle -> Armed` on trigger, `Armed -> Idle` on finalize. A trigger while
//! Armed is ignored: the in-flight event keeps its trigger time and id, and the
//! request is not queued.

use crate::window::{FrameCounts, WindowSpec};

/// Event being collected.
#[derive(Clone, Debug, PartialEq)]
pub struct ArmedEvent {
    pub event_id: String,
    pub tag: String,
    pub trigger_time: f64,
    completion: Completion,
}

#[derive(Clone, Debug, PartialEq)]
enum Completion {
    /// Finalize on the first batch at or past `deadline`.
    Deadline { deadline: f64 },
    /// Finalize once `post_needed` batches newer than the trigger have arrived.
    PostCount {
        counts: FrameCounts,
        post_arrivals: usize,
    },
}

impl ArmedEvent {
    /// Exact-count sizing, if the event was armed in that mode.
    pub fn frame_counts(&self) -> Option<FrameCounts> {
        match self.completion {
            Completion::PostCount { counts, .. } => Some(counts),
            Completion::Deadline { .. } => None,
        }
    }

    /// Post-trigger batches counted so far (exact-count mode only).
    pub fn post_arrivals(&self) -> Option<usize> {
        match self.completion {
            Completion::PostCount { post_arrivals, .. } => Some(post_arrivals),
            Completion::Deadline { .. } => None,
        }
    }

    /// Record a batch arrival. Returns true once the post-roll is complete.
    fn observe(&mut self, timestamp: f64) -> bool {
        match &mut self.completion {
            Completion::Deadline { deadline } => timestamp >= *deadline,
            Completion::PostCount {
                counts,
                post_arrivals,
            } => {
                if timestamp > self.trigger_time {
                    *post_arrivals += 1;
                }
                *post_arrivals >= counts.post_needed
            }
        }
    }
}

#[derive(Debug, Default)]
pub enum EventSession {
    #[default]
    Idle,
    Armed(ArmedEvent),
}

impl EventSession {
    pub fn is_armed(&self) -> bool {
        matches!(self, EventSession::Armed(_))
    }

    pub fn armed(&self) -> Option<&ArmedEvent> {
        match self {
            EventSession::Armed(event) => Some(event),
            EventSession::Idle => None,
        }
    }

    /// Arm a new event. Returns `None` without touching state if one is in flight.
    pub fn trigger(
        &mut self,
        spec: &WindowSpec,
        trigger_time: f64,
        event_id: String,
        tag: &str,
    ) -> Option<&ArmedEvent> {
        if self.is_armed() {
            return None;
        }
        let completion = match spec.frame_counts() {
            Some(counts) => Completion::PostCount {
                counts,
                post_arrivals: 0,
            },
            None => Completion::Deadline {
                deadline: trigger_time + spec.post_secs,
            },
        };
        *self = EventSession::Armed(ArmedEvent {
            event_id,
            tag: tag.to_string(),
            trigger_time,
            completion,
        });
        self.armed()
    }

    /// Feed a batch timestamp to the armed event.
    ///
    /// When the event completes the session returns to Idle and the finished
    /// event is handed back for window extraction.
    pub fn observe(&mut self, timestamp: f64) -> Option<ArmedEvent> {
        let done = match self {
            EventSession::Armed(event) => event.observe(timestamp),
            EventSession::Idle => false,
        };
        if !done {
            return None;
        }
        match std::mem::take(self) {
            EventSession::Armed(event) => Some(event),
            EventSession::Idle => None,
        }
    }
}

/// Event id: local wall-clock `%Y%m%d_%H%M%S`, plus `_<tag>` when a tag is given.
///
/// The id names a directory, so tag characters outside `[A-Za-z0-9_-]` become `_`.
pub fn event_id(now: chrono::DateTime<chrono::Local>, tag: &str) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let tag = sanitize_tag(tag);
    if tag.is_empty() {
        stamp
    } else {
        format!("{}_{}", stamp, tag)
    }
}

pub fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowMode;
    use chrono::TimeZone;

    fn time_spec() -> WindowSpec {
        WindowSpec {
            pre_secs: 5.0,
            post_secs: 5.0,
            mode: WindowMode::TimeBased,
        }
    }

    fn exact_spec() -> WindowSpec {
        WindowSpec {
            pre_secs: 1.0,
            post_secs: 1.0,
            mode: WindowMode::ExactCount { target_fps: 3.0 },
        }
    }

    #[test]
    fn second_trigger_is_ignored() {
        let mut session = EventSession::default();
        let first = session
            .trigger(&time_spec(), 100.0, "first".into(), "")
            .cloned()
            .unwrap();
        assert!(session
            .trigger(&time_spec(), 101.0, "second".into(), "")
            .is_none());
        let armed = session.armed().unwrap();
        assert_eq!(armed.event_id, first.event_id);
        assert_eq!(armed.trigger_time, 100.0);
    }

    #[test]
    fn time_based_completes_at_deadline() {
        let mut session = EventSession::default();
        session.trigger(&time_spec(), 100.0, "ev".into(), "");
        assert!(session.observe(104.99).is_none());
        let done = session.observe(105.0).unwrap();
        assert_eq!(done.event_id, "ev");
        assert!(!session.is_armed());
    }

    #[test]
    fn exact_count_counts_only_newer_batches() {
        let mut session = EventSession::default();
        session.trigger(&exact_spec(), 10.0, "ev".into(), "");
        assert!(session.observe(9.0).is_none());
        assert!(session.observe(10.0).is_none());
        assert_eq!(session.armed().and_then(|e| e.post_arrivals()), Some(0));
        assert!(session.observe(10.1).is_none());
        assert!(session.observe(10.2).is_none());
        let done = session.observe(10.3).unwrap();
        assert_eq!(done.post_arrivals(), Some(3));
        assert_eq!(
            done.frame_counts(),
            Some(FrameCounts {
                pre_needed: 3,
                post_needed: 3
            })
        );
        assert!(!session.is_armed());
    }

    #[test]
    fn idle_session_ignores_batches() {
        let mut session = EventSession::default();
        assert!(session.observe(1.0).is_none());
        assert!(!session.is_armed());
    }

    #[test]
    fn event_id_appends_sanitized_tag() {
        let now = chrono::Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .unwrap();
        assert_eq!(event_id(now, ""), "20240309_070501");
        assert_eq!(event_id(now, "crash"), "20240309_070501_crash");
        assert_eq!(event_id(now, "a/b c"), "20240309_070501_a_b_c");
    }
}
