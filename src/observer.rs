//! Hooks for watching events as they are recorded.
//!
//! Observers run synchronously inside the recording path and must not block.

use crate::capture::CapturedEvent;
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Callback invoked with every recorded event.
pub type EventObserver = Arc<dyn Fn(&CapturedEvent) + Send + Sync>;

/// Lines kept by the [`DebugFeed`].
pub const DEBUG_FEED_CAPACITY: usize = 25;

/// The most recent events as display lines, newest first.
#[derive(Debug, Clone, Default)]
pub struct DebugFeed {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl DebugFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: &CapturedEvent) {
        let line = format!(
            "{} - {}",
            event.occurred_at.with_timezone(&Local).format("%H:%M:%S"),
            event.event_type
        );
        let mut lines = self.lines.lock();
        lines.push_front(line);
        lines.truncate(DEBUG_FEED_CAPACITY);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// An observer feeding this debug feed.
    pub fn observer(&self) -> EventObserver {
        let feed = self.clone();
        Arc::new(move |event: &CapturedEvent| feed.push(event))
    }
}

/// An observer forwarding events over a bounded channel.
///
/// When the receiver falls behind, events are dropped rather than blocking the
/// recording path.
pub fn channel(capacity: usize) -> (EventObserver, Receiver<CapturedEvent>) {
    let (sender, receiver) = bounded(capacity);
    let observer: EventObserver = Arc::new(move |event: &CapturedEvent| {
        match sender.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(event_type = %event.event_type, "observer channel full, event dropped");
            }
        }
    });
    (observer, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EventType;
    use serde_json::json;

    #[test]
    fn test_debug_feed_keeps_newest_first() {
        let feed = DebugFeed::new();
        let observer = feed.observer();

        for _ in 0..30 {
            observer(&CapturedEvent::new(EventType::Blur, json!({}), "p"));
        }
        observer(&CapturedEvent::new(EventType::Focus, json!({}), "p"));

        let lines = feed.lines();
        assert_eq!(lines.len(), DEBUG_FEED_CAPACITY);
        assert!(lines[0].ends_with("FOCUS"));
        assert!(lines[1].ends_with("BLUR"));

        feed.clear();
        assert!(feed.lines().is_empty());
    }

    #[test]
    fn test_channel_drops_when_full() {
        let (observer, receiver) = channel(2);
        for _ in 0..5 {
            observer(&CapturedEvent::new(EventType::Drop, json!({}), "p"));
        }
        assert_eq!(receiver.try_iter().count(), 2);

        drop(receiver);
        // A disconnected receiver is not an error for the recorder.
        observer(&CapturedEvent::new(EventType::Drop, json!({}), "p"));
    }
}
