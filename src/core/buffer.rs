//! FIFO event buffer and the policy deciding when it is flushed.

use crate::capture::CapturedEvent;
use crate::config::LoggerConfig;
use std::collections::VecDeque;
use std::time::Duration;

/// Events waiting to be sent, oldest first.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: VecDeque<CapturedEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: CapturedEvent) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove and return up to `max` of the oldest events.
    pub fn take_batch(&mut self, max: usize) -> Vec<CapturedEvent> {
        let count = max.min(self.events.len());
        self.events.drain(..count).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedEvent> {
        self.events.iter()
    }
}

/// When a flush is due.
///
/// A flush is due when forced, when the buffer holds a full batch, or when
/// the send interval has passed since the last send attempt. An empty buffer
/// is never flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_batch_size: usize,
    pub send_interval: Duration,
}

impl FlushPolicy {
    pub fn from_config(config: &LoggerConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            send_interval: config.send_interval,
        }
    }

    pub fn is_due(&self, buffered: usize, since_last_send: Duration, force: bool) -> bool {
        if buffered == 0 {
            return false;
        }
        force || buffered >= self.max_batch_size || since_last_send >= self.send_interval
    }
}
