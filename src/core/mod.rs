//! Core pipeline of the exam logger.
//!
//! This module contains:
//! - The FIFO event buffer and its flush policy
//! - Per-batch delivery tasks with fixed-delay retry
//! - The logger tying capture, buffering and delivery together

pub mod buffer;
pub mod delivery;
pub mod logger;

// Re-export commonly used types
pub use buffer::{EventBuffer, FlushPolicy};
pub use delivery::{
    Batch, DeliveryObserver, DeliveryOutcome, DeliveryStatus, DeliveryTask, RETRY_DELAY,
};
pub use logger::{Logger, LoggerBuilder, LoggerError};
