//! Streaming output support.
//!
//! Backends emit many tiny fragments; displaying every one would flood the
//! delivery collaborator with edits. [`StreamCoalescer`] buffers fragments
//! and releases an update only when both throttles allow it:
//!
//! - at least `min_interval` has passed since the previous flush, and
//! - at least `min_chars` characters arrived since the previous flush.
//!
//! Each flush carries the full text accumulated so far, so a consumer can
//! simply replace the displayed message.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Events a streaming speak request produces for its consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Coalesced progress: the whole text so far.
    Partial { text: String },
    /// The delivered final text.
    Done {
        text: String,
        /// The first draft was replaced by a paraphrased retry.
        regenerated: bool,
    },
    /// The request could not start (no persona bound, and so on).
    Error { message: String },
}

/// Dual-throttle accumulator for streaming fragments.
#[derive(Debug)]
pub struct StreamCoalescer {
    min_interval: Duration,
    min_chars: usize,
    text: String,
    pending_chars: usize,
    last_flush: Option<Instant>,
}

impl StreamCoalescer {
    pub fn new(min_interval: Duration, min_chars: usize) -> Self {
        Self {
            min_interval,
            min_chars,
            text: String::new(),
            pending_chars: 0,
            last_flush: None,
        }
    }

    /// Add a fragment observed at `now`; returns the text to display if a
    /// flush is due.
    ///
    /// The interval is measured from the previous flush; before the first
    /// flush it is measured from nothing, so only the size threshold applies.
    pub fn push_at(&mut self, fragment: &str, now: Instant) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(fragment);
        self.pending_chars += fragment.chars().count();

        let interval_ok = self
            .last_flush
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval);
        if interval_ok && self.pending_chars >= self.min_chars {
            self.last_flush = Some(now);
            self.pending_chars = 0;
            Some(self.text.clone())
        } else {
            None
        }
    }

    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.push_at(fragment, Instant::now())
    }

    /// Text accumulated but not yet flushed, if any.
    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending_chars == 0 {
            return None;
        }
        self.pending_chars = 0;
        Some(self.text.clone())
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_threshold_holds_small_fragments() {
        let mut c = StreamCoalescer::new(Duration::from_millis(0), 10);
        let t0 = Instant::now();
        assert_eq!(c.push_at("hello", t0), None);
        assert_eq!(c.push_at(" world", t0).as_deref(), Some("hello world"));
    }

    #[test]
    fn test_interval_throttle() {
        let mut c = StreamCoalescer::new(Duration::from_millis(400), 3);
        let t0 = Instant::now();
        assert_eq!(c.push_at("abcd", t0).as_deref(), Some("abcd"));
        // enough characters but too soon
        assert_eq!(c.push_at("efgh", t0 + Duration::from_millis(100)), None);
        assert_eq!(
            c.push_at("ij", t0 + Duration::from_millis(450)).as_deref(),
            Some("abcdefghij")
        );
    }

    #[test]
    fn test_take_pending() {
        let mut c = StreamCoalescer::new(Duration::from_secs(10), 100);
        assert_eq!(c.take_pending(), None);
        c.push("partial");
        assert_eq!(c.take_pending().as_deref(), Some("partial"));
        assert_eq!(c.take_pending(), None);
        assert_eq!(c.text(), "partial");
    }

    #[test]
    fn test_stream_event_json_shape() {
        let ev = StreamEvent::Done {
            text: "hi".into(),
            regenerated: true,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["regenerated"], true);
    }
}
