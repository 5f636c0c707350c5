//! End-to-end tests of the capture, buffer and delivery pipeline

use async_trait::async_trait;
use exam_telemetry::capture::{
    ClipboardSnapshot, KeySignal, MemoryEventSource, Signal, SignalTarget, StaticClipboard,
    Visibility,
};
use exam_telemetry::{
    EventType, Logger, LoggerConfig, RequestOptions, ResponseBody, Transport, TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Accepts requests after rejecting the first `outage` of them.
#[derive(Default)]
struct RecordingTransport {
    outage: Mutex<u32>,
    bodies: Mutex<Vec<Value>>,
}

impl RecordingTransport {
    fn with_outage(requests: u32) -> Arc<Self> {
        Arc::new(Self {
            outage: Mutex::new(requests),
            ..Self::default()
        })
    }

    fn batch_types(&self) -> Vec<Vec<String>> {
        self.bodies
            .lock()
            .iter()
            .map(|body| {
                body["events"]
                    .as_array()
                    .map(|events| {
                        events
                            .iter()
                            .filter_map(|e| e["eventType"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn request(
        &self,
        _url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError> {
        self.bodies.lock().push(options.body.unwrap_or(Value::Null));
        let mut outage = self.outage.lock();
        if *outage > 0 {
            *outage -= 1;
            return Err(TransportError::Network("offline".to_string()));
        }
        Ok(ResponseBody::Json(json!({})))
    }
}

fn exam_logger(transport: &Arc<RecordingTransport>) -> (Logger, Arc<MemoryEventSource>) {
    let source = Arc::new(MemoryEventSource::default());
    let config = LoggerConfig::for_instance("https://exam.example.edu", "981")
        .with_send_interval(Duration::from_secs(5));
    let logger = Logger::new(config, transport.clone(), source.clone()).expect("Invalid config");
    (logger, source)
}

fn set_visibility(source: &MemoryEventSource, visibility: Visibility) {
    source.update_state(|state| state.visibility = visibility);
    source.dispatch(SignalTarget::Document, "visibilitychange", &Signal::Empty);
}

#[tokio::test(start_paused = true)]
async fn test_exam_session_is_delivered_in_order() {
    let transport = Arc::new(RecordingTransport::default());
    let (logger, source) = exam_logger(&transport);

    logger.start().expect("Failed to start logger");
    logger.record(EventType::TestStart, json!({ "testId": 981 }));

    let clipboard: Arc<dyn ClipboardSnapshot> = Arc::new(StaticClipboard::text("def solve():"));
    source.dispatch(
        SignalTarget::Document,
        "paste",
        &Signal::Clipboard(Some(clipboard)),
    );
    source.dispatch(
        SignalTarget::Document,
        "keydown",
        &Signal::Key(KeySignal::new("c").with_ctrl()),
    );
    source.dispatch(SignalTarget::Document, "copy", &Signal::Clipboard(None));

    // Hiding the tab forces the first batch out.
    tokio::time::sleep(Duration::from_secs(1)).await;
    set_visibility(&source, Visibility::Hidden);

    tokio::time::sleep(Duration::from_secs(2)).await;
    set_visibility(&source, Visibility::Visible);
    logger.record(EventType::QuestionSwitched, json!({ "from": 1, "to": 2 }));

    // The timer picks the rest up once the interval has passed.
    tokio::time::sleep(Duration::from_secs(8)).await;
    source.dispatch(SignalTarget::Window, "pagehide", &Signal::Empty);
    logger.stop();
    logger.wait_for_deliveries().await;

    assert_eq!(
        transport.batch_types(),
        vec![
            vec!["PAGELOAD", "TESTSTART", "CLIPBOARD", "SHORTCUT", "CLIPBOARD", "TABHIDDEN"],
            vec!["TABVISIBLE", "QUESTIONSWITCHED"],
            vec!["HIDE"],
        ]
    );

    let bodies = transport.bodies.lock().clone();
    let events: Vec<&Value> = bodies
        .iter()
        .filter_map(|b| b["events"].as_array())
        .flatten()
        .collect();
    assert!(events.iter().all(|e| e["pageId"] == logger.page_id()));
    assert_eq!(
        events[2]["eventData"],
        json!({
            "type": "paste",
            "clipboardData": { "text": "def solve():", "text/plain": "def solve():" }
        })
    );
    assert_eq!(events[4]["eventData"], json!({ "type": "copy" }));
    assert_eq!(logger.buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_outage_is_recorded_and_batch_resent() {
    let transport = RecordingTransport::with_outage(2);
    let (logger, _source) = exam_logger(&transport);

    logger.start().expect("Failed to start logger");
    logger.record(EventType::TestStart, json!({}));
    logger.flush();
    logger.wait_for_deliveries().await;

    // Both failures are queued for the next batch.
    let pending: Vec<EventType> = logger.buffered().iter().map(|e| e.event_type).collect();
    assert_eq!(pending, vec![EventType::NetworkError, EventType::NetworkError]);

    logger.stop();
    logger.wait_for_deliveries().await;

    let bodies = transport.bodies.lock().clone();
    assert_eq!(bodies.len(), 4);
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    assert_eq!(
        transport.batch_types()[3],
        vec!["NETWORKERROR", "NETWORKERROR"]
    );

    let stats = logger.stats().snapshot();
    assert_eq!(stats.batches_flushed, 2);
    assert_eq!(stats.send_attempts, 4);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.batches_delivered, 2);
    assert_eq!(stats.batches_pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_keeps_page_id() {
    let transport = Arc::new(RecordingTransport::default());
    let (logger, source) = exam_logger(&transport);

    logger.start().expect("Failed to start logger");
    let installed = source.listener_count();
    logger.stop();
    assert_eq!(source.listener_count(), 0);

    logger.start().expect("Failed to restart logger");
    assert_eq!(source.listener_count(), installed);
    logger.stop();
    logger.wait_for_deliveries().await;

    let bodies = transport.bodies.lock().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(
        bodies[0]["events"][0]["pageId"],
        bodies[1]["events"][0]["pageId"]
    );
}
