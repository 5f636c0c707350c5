//! Exam Telemetry - behavioral integrity telemetry for proctored tests.
//!
//! This library captures integrity-relevant signals while a student takes a
//! test (clipboard use, shortcuts, tab switches, focus loss, printing, resizes)
//! and delivers them to the exam backend in batches, retrying until each batch
//! is accepted.
//!
//! # Delivery Guarantees
//!
//! - **In order**: events leave the buffer oldest first, in bounded batches
//! - **At least once**: a failed batch is resent unchanged every 1.5 seconds
//! - **Visible failures**: every failed attempt is itself recorded as NETWORKERROR
//! - **Clean teardown**: stopping removes exactly the listeners that were added
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Exam Telemetry                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ EventSource │──▶│   Capture   │──▶│   Buffer    │       │
//! │  │ (host/page) │   │  Listener   │   │   (FIFO)    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │ flush        │
//! │                                             ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Observers  │   │    Auth     │◀──│  Delivery   │       │
//! │  │ (debug feed)│   │  Transport  │   │   (retry)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use exam_telemetry::{
//!     AuthTransport, LoggerConfig, Logger, MemoryEventSource, ReqwestBackend, Session,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::with_token("token"));
//! let transport = AuthTransport::new("https://exam.example.edu", session, ReqwestBackend::new()?)?;
//! let source = Arc::new(MemoryEventSource::default());
//!
//! let config = LoggerConfig::for_instance("https://exam.example.edu", "981");
//! let logger = Logger::new(config, Arc::new(transport), source)?;
//! logger.start()?;
//! // Forward page signals into the source...
//! logger.stop();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod observer;
pub mod stats;
pub mod transport;

// Re-export key types at crate root for convenience
pub use capture::{
    CaptureError, CapturedEvent, EventSource, EventType, KeySignal, MemoryEventSource, PageState,
    Signal, SignalTarget, StaticClipboard,
};
pub use config::{ClientConfig, ConfigError, LoggerConfig};
pub use core::{DeliveryOutcome, DeliveryStatus, Logger, LoggerBuilder, LoggerError};
pub use observer::{DebugFeed, EventObserver};
pub use stats::{StatsSnapshot, TelemetryStats};
pub use transport::{
    AuthTransport, RequestOptions, ResponseBody, Session, Transport, TransportError,
};

#[cfg(feature = "http")]
pub use transport::ReqwestBackend;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to test takers before monitoring begins.
pub const MONITORING_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                 EXAM TELEMETRY - MONITORING NOTICE               ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  While this test is open, integrity signals are recorded.        ║
║                                                                  ║
║  ✓ WHAT IS RECORDED:                                             ║
║    • Copy, cut and paste (pasted content is included)            ║
║    • Editing and browser shortcuts (Ctrl/Cmd + key)              ║
║    • Leaving the tab or window, and how long it was open         ║
║    • Printing, screenshots, fullscreen changes and resizes       ║
║                                                                  ║
║  ✗ WHAT IS NEVER RECORDED:                                       ║
║    • Ordinary typing outside of shortcuts                        ║
║    • Mouse position or movement                                  ║
║    • Other tabs or applications                                  ║
║                                                                  ║
║  Events are sent to your institution's exam server only.         ║
║                                                                  ║
║  List the recorded event types anytime with:                     ║
║    exam-telemetry types                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
