//! Delivery statistics for one logger.
//!
//! Counters only; nothing here is persisted or sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for the capture and delivery pipeline.
#[derive(Debug)]
pub struct TelemetryStats {
    /// Events appended to the buffer
    events_recorded: AtomicU64,
    /// Batches extracted from the buffer
    batches_flushed: AtomicU64,
    /// Send attempts, retries included
    send_attempts: AtomicU64,
    /// Attempts that failed
    failed_attempts: AtomicU64,
    /// Batches acknowledged by the endpoint
    batches_delivered: AtomicU64,
    created_at: DateTime<Utc>,
}

impl TelemetryStats {
    pub fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            send_attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            created_at: Utc::now(),
        }
    }

    pub fn record_event(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.send_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            send_attempts: self.send_attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            created_at: self.created_at,
            uptime_secs: (Utc::now() - self.created_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Telemetry Statistics:\n\
             - Events recorded: {}\n\
             - Batches flushed: {}\n\
             - Send attempts: {}\n\
             - Failed attempts: {}\n\
             - Batches delivered: {}\n\
             - Batches pending: {}\n\
             - Uptime: {} seconds",
            stats.events_recorded,
            stats.batches_flushed,
            stats.send_attempts,
            stats.failed_attempts,
            stats.batches_delivered,
            stats.batches_pending(),
            stats.uptime_secs
        )
    }
}

impl Default for TelemetryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of telemetry statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_recorded: u64,
    pub batches_flushed: u64,
    pub send_attempts: u64,
    pub failed_attempts: u64,
    pub batches_delivered: u64,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    /// Batches flushed but not yet acknowledged.
    pub fn batches_pending(&self) -> u64 {
        self.batches_flushed.saturating_sub(self.batches_delivered)
    }
}
