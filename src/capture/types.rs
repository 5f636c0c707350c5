//! Canonical telemetry records produced by the capture layer.
//!
//! Every signal observed on the page is normalized into a [`CapturedEvent`]
//! before it enters the buffer. The wire shape is fixed by the backend.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable event type strings understood by the telemetry endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    PageLoad,
    Clipboard,
    ContextMenu,
    SelectStart,
    DragStart,
    Drop,
    Shortcut,
    PrintScreen,
    Print,
    TabHidden,
    TabVisible,
    Blur,
    Focus,
    Fullscreen,
    Resize,
    NetworkError,
    Hide,
    Unload,
    /// Recorded by the host when the test itself begins
    TestStart,
    /// Recorded by the host when an answer changes
    QuestionUpdate,
    /// Recorded by the host when the candidate moves between questions
    QuestionSwitched,
}

impl EventType {
    /// All event types, in wire order.
    pub const ALL: [EventType; 21] = [
        EventType::PageLoad,
        EventType::Clipboard,
        EventType::ContextMenu,
        EventType::SelectStart,
        EventType::DragStart,
        EventType::Drop,
        EventType::Shortcut,
        EventType::PrintScreen,
        EventType::Print,
        EventType::TabHidden,
        EventType::TabVisible,
        EventType::Blur,
        EventType::Focus,
        EventType::Fullscreen,
        EventType::Resize,
        EventType::NetworkError,
        EventType::Hide,
        EventType::Unload,
        EventType::TestStart,
        EventType::QuestionUpdate,
        EventType::QuestionSwitched,
    ];

    /// The string sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageLoad => "PAGELOAD",
            EventType::Clipboard => "CLIPBOARD",
            EventType::ContextMenu => "CONTEXTMENU",
            EventType::SelectStart => "SELECTSTART",
            EventType::DragStart => "DRAGSTART",
            EventType::Drop => "DROP",
            EventType::Shortcut => "SHORTCUT",
            EventType::PrintScreen => "PRINTSCREEN",
            EventType::Print => "PRINT",
            EventType::TabHidden => "TABHIDDEN",
            EventType::TabVisible => "TABVISIBLE",
            EventType::Blur => "BLUR",
            EventType::Focus => "FOCUS",
            EventType::Fullscreen => "FULLSCREEN",
            EventType::Resize => "RESIZE",
            EventType::NetworkError => "NETWORKERROR",
            EventType::Hide => "HIDE",
            EventType::Unload => "UNLOAD",
            EventType::TestStart => "TESTSTART",
            EventType::QuestionUpdate => "QUESTIONUPDATE",
            EventType::QuestionSwitched => "QUESTIONSWITCHED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// When the signal was observed. The wire key keeps the backend's spelling.
    #[serde(rename = "occuredAt", with = "iso_millis")]
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(rename = "eventData")]
    pub event_data: Value,
    #[serde(rename = "pageId")]
    pub page_id: String,
}

impl CapturedEvent {
    pub fn new(event_type: EventType, event_data: Value, page_id: impl Into<String>) -> Self {
        Self {
            occurred_at: Utc::now(),
            event_type,
            event_data,
            page_id: page_id.into(),
        }
    }
}

/// ISO-8601 timestamp with millisecond precision, as produced by browsers.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::iso_timestamp(*at))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_strings() {
        for event_type in EventType::ALL {
            let encoded = serde_json::to_value(event_type).unwrap();
            assert_eq!(encoded, json!(event_type.as_str()));
        }
        assert_eq!(EventType::NetworkError.to_string(), "NETWORKERROR");
        assert_eq!(EventType::TabHidden.as_str(), "TABHIDDEN");
    }

    #[test]
    fn test_captured_event_wire_shape() {
        let mut event = CapturedEvent::new(EventType::Shortcut, json!({"key": "c"}), "page-1");
        event.occurred_at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["occuredAt"], "2025-03-01T09:30:00.000Z");
        assert_eq!(wire["eventType"], "SHORTCUT");
        assert_eq!(wire["eventData"]["key"], "c");
        assert_eq!(wire["pageId"], "page-1");

        let decoded: CapturedEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, event);
    }
}
