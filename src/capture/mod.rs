//! Signal capture for the exam telemetry logger.
//!
//! This module defines the canonical event record, the raw signals a host
//! feeds in, the injectable [`EventSource`] seam, and the listener set that
//! normalizes one into the other.

pub mod listener;
pub mod signal;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use listener::{CaptureListener, Recorder, RESIZE_DEBOUNCE, WATCHED_KEYS};
pub use signal::{
    CaptureError, ClipboardFile, ClipboardSnapshot, KeySignal, PageState, Signal,
    StaticClipboard, Viewport, Visibility,
};
pub use source::{
    EventSource, ListenerOptions, ListenerRegistration, MemoryEventSource, SignalHandler,
    SignalTarget,
};
pub use types::{iso_timestamp, CapturedEvent, EventType};
