//! Raw page signals as delivered by an [`EventSource`](super::EventSource).

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors raised while reading signal payloads.
///
/// These never escape a handler; they only degrade the recorded payload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("clipboard data for '{format}' unavailable: {reason}")]
    ClipboardRead { format: String, reason: String },
    #[error("failed to read clipboard file '{name}': {reason}")]
    FileRead { name: String, reason: String },
}

/// Payload attached to a dispatched signal.
#[derive(Debug, Clone, Default)]
pub enum Signal {
    /// Signals that carry nothing beyond their name (blur, drop, ...).
    #[default]
    Empty,
    /// Clipboard access; `None` when the host exposes no clipboard data.
    Clipboard(Option<Arc<dyn ClipboardSnapshot>>),
    /// A key press.
    Key(KeySignal),
}

/// A key press with its modifier state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignal {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeySignal {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// Read access to the clipboard contents attached to a paste.
///
/// Every accessor may fail independently, mirroring browser clipboard APIs
/// where individual formats or files can be denied.
pub trait ClipboardSnapshot: Send + Sync + std::fmt::Debug {
    /// MIME types on offer, including the pseudo-type `Files`.
    fn types(&self) -> Vec<String>;
    /// Data for one format. `text` is an alias for `text/plain`.
    fn get_data(&self, format: &str) -> Result<String, CaptureError>;
    /// File items, each read independently.
    fn files(&self) -> Vec<Result<ClipboardFile, CaptureError>>;
}

/// A file pasted from the clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// An in-memory clipboard snapshot, used by hosts that forward recorded
/// clipboard contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticClipboard {
    /// Format to data
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<ClipboardFile>,
}

impl StaticClipboard {
    pub fn text(text: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert("text/plain".to_string(), text.into());
        Self {
            data,
            files: Vec::new(),
        }
    }

    pub fn with_data(mut self, format: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(format.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: ClipboardFile) -> Self {
        self.files.push(file);
        self
    }
}

impl ClipboardSnapshot for StaticClipboard {
    fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.data.keys().cloned().collect();
        if !self.files.is_empty() {
            types.push("Files".to_string());
        }
        types
    }

    fn get_data(&self, format: &str) -> Result<String, CaptureError> {
        let format = if format == "text" { "text/plain" } else { format };
        // Browsers hand back an empty string for formats that are not present.
        Ok(self.data.get(format).cloned().unwrap_or_default())
    }

    fn files(&self) -> Vec<Result<ClipboardFile, CaptureError>> {
        self.files.iter().cloned().map(Ok).collect()
    }
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// Document visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Page state queried by handlers when a signal fires.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    /// Path and query of the current page
    pub url: String,
    pub viewport: Viewport,
    pub visibility: Visibility,
    pub fullscreen: bool,
    pub timezone: Tz,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            url: "/".to_string(),
            viewport: Viewport::default(),
            visibility: Visibility::Visible,
            fullscreen: false,
            timezone: Tz::UTC,
        }
    }
}
