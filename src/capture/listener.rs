//! Turns raw page signals into captured events.
//!
//! Handlers are installed on an [`EventSource`] and recorded as
//! [`ListenerRegistration`]s so that teardown is exactly symmetric. A handler
//! never panics and never drops its event: a payload that cannot be read in
//! full is recorded in degraded form.

use super::signal::{ClipboardSnapshot, KeySignal, Signal, Visibility};
use super::source::{
    EventSource, ListenerOptions, ListenerRegistration, SignalHandler, SignalTarget,
};
use super::types::EventType;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Quiet period before a resize is reported.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);

/// Keys reported as shortcuts when pressed with Ctrl or Meta.
pub const WATCHED_KEYS: [&str; 16] = [
    "c", "x", "v", "a", "p", "s", "l", "k", "f", "o", "n", "t", "w", "r", "z", "y",
];

/// Sink for normalized events.
pub trait Recorder: Send + Sync {
    /// Append an event to the buffer.
    fn record(&self, event_type: EventType, event_data: Value);
    /// Flush regardless of size or time.
    fn flush_now(&self);
}

/// Tracks how long the page has been visible.
#[derive(Debug, Default)]
pub struct VisibilityClock {
    visible_since: Option<Instant>,
}

impl VisibilityClock {
    pub fn new(visibility: Visibility, now: Instant) -> Self {
        Self {
            visible_since: (visibility == Visibility::Visible).then_some(now),
        }
    }

    /// Mark the page hidden, returning how long it was visible in
    /// milliseconds, or `None` if it was already hidden.
    pub fn hidden_at(&mut self, now: Instant) -> Option<f64> {
        self.visible_since
            .take()
            .map(|since| now.saturating_duration_since(since).as_secs_f64() * 1000.0)
    }

    pub fn visible_at(&mut self, now: Instant) {
        self.visible_since = Some(now);
    }
}

/// Payload for a clipboard signal.
///
/// Copy and cut carry only their kind. Paste extracts every readable format
/// and file; failures are collected under `errors` instead of aborting.
pub fn clipboard_payload(kind: &str, clipboard: Option<&dyn ClipboardSnapshot>) -> Value {
    if kind != "paste" {
        return json!({ "type": kind });
    }

    let mut data = Map::new();
    let mut errors: Vec<String> = Vec::new();

    if let Some(clipboard) = clipboard {
        for format in clipboard.types() {
            // html is stored as its plain text below
            if format == "Files" || format == "text/html" {
                continue;
            }
            match clipboard.get_data(&format) {
                Ok(value) => {
                    data.insert(format, Value::String(value));
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        match clipboard.get_data("text") {
            Ok(text) => {
                data.insert("text".to_string(), Value::String(text));
            }
            Err(e) => errors.push(e.to_string()),
        }

        let mut files = Vec::new();
        for file in clipboard.files() {
            match file {
                Ok(file) => files.push(json!({
                    "name": file.name,
                    "mime": file.mime,
                    "size": file.bytes.len(),
                    "bytes": STANDARD.encode(&file.bytes),
                })),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !files.is_empty() {
            data.insert("Files".to_string(), Value::Array(files));
        }
    }

    if !errors.is_empty() {
        tracing::warn!(errors = errors.len(), "clipboard payload degraded");
        data.insert(
            "errors".to_string(),
            Value::Array(errors.into_iter().map(Value::String).collect()),
        );
    }

    json!({ "type": kind, "clipboardData": Value::Object(data) })
}

/// Payload for a watched shortcut, if `key` is one.
pub fn shortcut_payload(key: &KeySignal) -> Option<Value> {
    let lowered = key.key.to_lowercase();
    if !(key.ctrl || key.meta) || !WATCHED_KEYS.contains(&lowered.as_str()) {
        return None;
    }
    Some(json!({
        "key": lowered,
        "ctrl": key.ctrl,
        "meta": key.meta,
        "alt": key.alt,
        "shift": key.shift,
    }))
}

pub fn is_print_screen(key: &KeySignal) -> bool {
    key.key.eq_ignore_ascii_case("printscreen")
}

struct Installer<'a> {
    source: &'a Arc<dyn EventSource>,
    registrations: Vec<ListenerRegistration>,
}

impl Installer<'_> {
    fn on(
        &mut self,
        target: SignalTarget,
        name: &'static str,
        options: ListenerOptions,
        handler: impl Fn(&Signal) + Send + Sync + 'static,
    ) {
        let handler: SignalHandler = Arc::new(handler);
        self.source
            .subscribe(target, name, Arc::clone(&handler), options);
        self.registrations.push(ListenerRegistration {
            target,
            name,
            handler,
            options,
        });
    }

    /// A listener that records `event_type` with an empty payload.
    fn plain(
        &mut self,
        target: SignalTarget,
        name: &'static str,
        options: ListenerOptions,
        recorder: &Weak<dyn Recorder>,
        event_type: EventType,
    ) {
        let recorder = recorder.clone();
        self.on(target, name, options, move |_| {
            if let Some(recorder) = recorder.upgrade() {
                recorder.record(event_type, json!({}));
            }
        });
    }
}

/// The set of listeners installed for one running logger.
pub struct CaptureListener {
    source: Arc<dyn EventSource>,
    registrations: Vec<ListenerRegistration>,
    pending_resize: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CaptureListener {
    /// Subscribe every capture handler on `source`.
    ///
    /// Handlers hold only weak references, so a dropped logger silently
    /// stops recording.
    pub fn install(
        source: Arc<dyn EventSource>,
        recorder: Weak<dyn Recorder>,
        runtime: Handle,
    ) -> Self {
        use ListenerOptions as Opt;
        use SignalTarget::{Document, Window};

        let weak_source = Arc::downgrade(&source);
        let pending_resize: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let mut installer = Installer {
            source: &source,
            registrations: Vec::new(),
        };

        for kind in ["copy", "cut", "paste"] {
            let recorder = recorder.clone();
            installer.on(Document, kind, Opt::CAPTURE, move |signal| {
                let Some(recorder) = recorder.upgrade() else {
                    return;
                };
                let clipboard = match signal {
                    Signal::Clipboard(clipboard) => clipboard.as_deref(),
                    _ => None,
                };
                recorder.record(EventType::Clipboard, clipboard_payload(kind, clipboard));
            });
        }

        installer.plain(Document, "contextmenu", Opt::CAPTURE, &recorder, EventType::ContextMenu);
        installer.plain(Document, "selectstart", Opt::CAPTURE, &recorder, EventType::SelectStart);
        installer.plain(Document, "dragstart", Opt::CAPTURE, &recorder, EventType::DragStart);
        installer.plain(Document, "drop", Opt::CAPTURE, &recorder, EventType::Drop);

        {
            let recorder = recorder.clone();
            installer.on(Document, "keydown", Opt::CAPTURE, move |signal| {
                let (Some(recorder), Signal::Key(key)) = (recorder.upgrade(), signal) else {
                    return;
                };
                if let Some(payload) = shortcut_payload(key) {
                    recorder.record(EventType::Shortcut, payload);
                }
                if is_print_screen(key) {
                    recorder.record(EventType::PrintScreen, json!({}));
                }
            });
        }

        installer.plain(Window, "beforeprint", Opt::BUBBLE, &recorder, EventType::Print);
        installer.plain(Window, "afterprint", Opt::BUBBLE, &recorder, EventType::Print);

        {
            let recorder = recorder.clone();
            let source = weak_source.clone();
            let clock = Mutex::new(VisibilityClock::new(
                installer.source.page_state().visibility,
                Instant::now(),
            ));
            installer.on(Document, "visibilitychange", Opt::BUBBLE, move |_| {
                let (Some(recorder), Some(source)) = (recorder.upgrade(), source.upgrade()) else {
                    return;
                };
                match source.page_state().visibility {
                    Visibility::Hidden => {
                        let open_ms = clock.lock().hidden_at(Instant::now());
                        recorder.record(EventType::TabHidden, json!({ "openMs": open_ms }));
                        recorder.flush_now();
                    }
                    Visibility::Visible => {
                        clock.lock().visible_at(Instant::now());
                        recorder.record(EventType::TabVisible, json!({}));
                    }
                }
            });
        }

        installer.plain(Window, "blur", Opt::BUBBLE, &recorder, EventType::Blur);
        installer.plain(Window, "focus", Opt::BUBBLE, &recorder, EventType::Focus);

        {
            let recorder = recorder.clone();
            let source = weak_source.clone();
            installer.on(Document, "fullscreenchange", Opt::BUBBLE, move |_| {
                let (Some(recorder), Some(source)) = (recorder.upgrade(), source.upgrade()) else {
                    return;
                };
                let fullscreen = source.page_state().fullscreen;
                recorder.record(EventType::Fullscreen, json!({ "isFullscreen": fullscreen }));
            });
        }

        {
            let recorder = recorder.clone();
            let source = weak_source.clone();
            let pending = Arc::clone(&pending_resize);
            installer.on(Window, "resize", Opt::BUBBLE, move |_| {
                let mut pending = pending.lock();
                if let Some(previous) = pending.take() {
                    previous.abort();
                }
                let recorder = recorder.clone();
                let source = source.clone();
                *pending = Some(runtime.spawn(async move {
                    tokio::time::sleep(RESIZE_DEBOUNCE).await;
                    let (Some(recorder), Some(source)) = (recorder.upgrade(), source.upgrade())
                    else {
                        return;
                    };
                    let viewport = source.page_state().viewport;
                    recorder.record(
                        EventType::Resize,
                        json!({ "w": viewport.width, "h": viewport.height }),
                    );
                }));
            });
        }

        for (name, event_type) in [("pagehide", EventType::Hide), ("unload", EventType::Unload)] {
            let recorder = recorder.clone();
            installer.on(Window, name, Opt::BUBBLE, move |_| {
                if let Some(recorder) = recorder.upgrade() {
                    recorder.record(event_type, json!({}));
                    recorder.flush_now();
                }
            });
        }

        let registrations = installer.registrations;
        tracing::debug!(listeners = registrations.len(), "capture listeners installed");

        Self {
            source,
            registrations,
            pending_resize,
        }
    }

    pub fn registrations(&self) -> &[ListenerRegistration] {
        &self.registrations
    }

    /// Detach every recorded listener with its original options and cancel a
    /// pending resize report.
    pub fn remove(self) {
        for registration in &self.registrations {
            self.source.unsubscribe(
                registration.target,
                registration.name,
                &registration.handler,
                registration.options,
            );
        }
        if let Some(pending) = self.pending_resize.lock().take() {
            pending.abort();
        }
        tracing::debug!(
            listeners = self.registrations.len(),
            "capture listeners removed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::signal::{CaptureError, ClipboardFile, StaticClipboard};
    use crate::capture::source::MemoryEventSource;

    /// Records everything it is handed.
    #[derive(Default)]
    struct Sink {
        events: Mutex<Vec<(EventType, Value)>>,
        flushes: Mutex<u32>,
    }

    impl Recorder for Sink {
        fn record(&self, event_type: EventType, event_data: Value) {
            self.events.lock().push((event_type, event_data));
        }

        fn flush_now(&self) {
            *self.flushes.lock() += 1;
        }
    }

    impl Sink {
        fn take(&self) -> Vec<(EventType, Value)> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    fn install(sink: &Arc<Sink>) -> (Arc<MemoryEventSource>, CaptureListener) {
        let source = Arc::new(MemoryEventSource::default());
        let recorder: Arc<dyn Recorder> = sink.clone();
        let listener = CaptureListener::install(
            source.clone(),
            Arc::downgrade(&recorder),
            Handle::current(),
        );
        (source, listener)
    }

    #[tokio::test]
    async fn test_listener_phases() {
        use SignalTarget::{Document, Window};

        let sink = Arc::new(Sink::default());
        let (source, listener) = install(&sink);

        let capture = [
            "copy",
            "cut",
            "paste",
            "contextmenu",
            "selectstart",
            "dragstart",
            "drop",
            "keydown",
        ];
        for name in capture {
            assert_eq!(
                source.listeners_for(Document, name),
                vec![ListenerOptions::CAPTURE],
                "{name}"
            );
        }

        let window_bubble = [
            "beforeprint",
            "afterprint",
            "blur",
            "focus",
            "resize",
            "pagehide",
            "unload",
        ];
        for name in window_bubble {
            assert_eq!(
                source.listeners_for(Window, name),
                vec![ListenerOptions::BUBBLE],
                "{name}"
            );
        }

        for name in ["visibilitychange", "fullscreenchange"] {
            assert_eq!(
                source.listeners_for(Document, name),
                vec![ListenerOptions::BUBBLE],
                "{name}"
            );
        }

        assert_eq!(source.listener_count(), 17);
        assert_eq!(listener.registrations().len(), 17);

        listener.remove();
        assert_eq!(source.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_handlers_record_their_event_types() {
        use SignalTarget::{Document, Window};

        let sink = Arc::new(Sink::default());
        let (source, listener) = install(&sink);

        source.update_state(|state| state.fullscreen = true);
        source.dispatch(Document, "fullscreenchange", &Signal::Empty);
        source.update_state(|state| state.fullscreen = false);
        source.dispatch(Document, "fullscreenchange", &Signal::Empty);
        assert_eq!(
            sink.take(),
            vec![
                (EventType::Fullscreen, json!({ "isFullscreen": true })),
                (EventType::Fullscreen, json!({ "isFullscreen": false })),
            ]
        );

        source.dispatch(Window, "beforeprint", &Signal::Empty);
        source.dispatch(Window, "afterprint", &Signal::Empty);
        assert_eq!(
            sink.take(),
            vec![(EventType::Print, json!({})), (EventType::Print, json!({}))]
        );

        source.dispatch(Document, "keydown", &Signal::Key(KeySignal::new("PrintScreen")));
        source.dispatch(Document, "keydown", &Signal::Key(KeySignal::new("q")));
        assert_eq!(sink.take(), vec![(EventType::PrintScreen, json!({}))]);

        source.dispatch(Document, "cut", &Signal::Clipboard(None));
        assert_eq!(
            sink.take(),
            vec![(EventType::Clipboard, json!({ "type": "cut" }))]
        );

        for (name, event_type) in [
            ("contextmenu", EventType::ContextMenu),
            ("selectstart", EventType::SelectStart),
            ("dragstart", EventType::DragStart),
            ("drop", EventType::Drop),
        ] {
            assert_eq!(source.dispatch(Document, name, &Signal::Empty), 1);
            assert_eq!(sink.take(), vec![(event_type, json!({}))], "{name}");
        }
        assert_eq!(*sink.flushes.lock(), 0);

        source.dispatch(Window, "unload", &Signal::Empty);
        assert_eq!(sink.take(), vec![(EventType::Unload, json!({}))]);
        assert_eq!(*sink.flushes.lock(), 1);

        listener.remove();
        assert_eq!(source.dispatch(Window, "unload", &Signal::Empty), 0);
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_recorder_stops_recording() {
        let source = Arc::new(MemoryEventSource::default());
        let sink = Arc::new(Sink::default());
        let recorder: Arc<dyn Recorder> = sink.clone();
        let weak = Arc::downgrade(&recorder);
        drop(recorder);
        drop(sink);

        let listener = CaptureListener::install(source.clone(), weak, Handle::current());
        assert_eq!(source.dispatch(SignalTarget::Window, "blur", &Signal::Empty), 1);
        listener.remove();
    }

    #[derive(Debug)]
    struct DeniedClipboard;

    impl ClipboardSnapshot for DeniedClipboard {
        fn types(&self) -> Vec<String> {
            vec!["text/plain".to_string(), "Files".to_string()]
        }

        fn get_data(&self, format: &str) -> Result<String, CaptureError> {
            Err(CaptureError::ClipboardRead {
                format: format.to_string(),
                reason: "permission denied".to_string(),
            })
        }

        fn files(&self) -> Vec<Result<ClipboardFile, CaptureError>> {
            vec![Err(CaptureError::FileRead {
                name: "secret.pdf".to_string(),
                reason: "aborted".to_string(),
            })]
        }
    }

    #[test]
    fn test_copy_payload_has_kind_only() {
        assert_eq!(clipboard_payload("copy", None), json!({ "type": "copy" }));
        assert_eq!(clipboard_payload("cut", None), json!({ "type": "cut" }));
    }

    #[test]
    fn test_paste_payload_extracts_formats_and_files() {
        let clipboard = StaticClipboard::text("answer 42")
            .with_data("text/html", "<p>answer 42</p>")
            .with_data("application/x-custom", "raw")
            .with_file(ClipboardFile {
                name: "a.txt".to_string(),
                mime: "text/plain".to_string(),
                bytes: b"hi".to_vec(),
            });

        let payload = clipboard_payload("paste", Some(&clipboard));
        let data = &payload["clipboardData"];

        assert_eq!(payload["type"], "paste");
        assert_eq!(data["text"], "answer 42");
        assert_eq!(data["text/plain"], "answer 42");
        assert_eq!(data["application/x-custom"], "raw");
        assert!(data.get("text/html").is_none());
        assert_eq!(data["Files"][0]["name"], "a.txt");
        assert_eq!(data["Files"][0]["size"], 2);
        assert_eq!(data["Files"][0]["bytes"], "aGk=");
        assert!(data.get("errors").is_none());
    }

    #[test]
    fn test_paste_payload_degrades_on_failures() {
        let payload = clipboard_payload("paste", Some(&DeniedClipboard));
        let data = &payload["clipboardData"];

        assert_eq!(payload["type"], "paste");
        assert!(data.get("text").is_none());
        assert!(data.get("Files").is_none());
        // text/plain, text, and the one file
        assert_eq!(data["errors"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_paste_without_clipboard_data() {
        let payload = clipboard_payload("paste", None);
        assert_eq!(payload, json!({ "type": "paste", "clipboardData": {} }));
    }

    #[test]
    fn test_shortcut_requires_modifier_and_watched_key() {
        assert!(shortcut_payload(&KeySignal::new("c")).is_none());
        assert!(shortcut_payload(&KeySignal::new("b").with_ctrl()).is_none());

        let payload = shortcut_payload(&KeySignal::new("V").with_meta().with_shift()).unwrap();
        assert_eq!(
            payload,
            json!({ "key": "v", "ctrl": false, "meta": true, "alt": false, "shift": true })
        );

        for key in WATCHED_KEYS {
            assert!(shortcut_payload(&KeySignal::new(key).with_ctrl()).is_some());
        }
    }

    #[test]
    fn test_print_screen_detection() {
        assert!(is_print_screen(&KeySignal::new("PrintScreen")));
        assert!(!is_print_screen(&KeySignal::new("p").with_ctrl()));
    }

    #[test]
    fn test_visibility_clock() {
        let start = Instant::now();
        let mut clock = VisibilityClock::new(Visibility::Visible, start);

        let open = clock.hidden_at(start + Duration::from_millis(1200)).unwrap();
        assert!((open - 1200.0).abs() < 0.001);

        // Already hidden.
        assert!(clock.hidden_at(start + Duration::from_millis(1500)).is_none());

        clock.visible_at(start + Duration::from_millis(2000));
        let open = clock.hidden_at(start + Duration::from_millis(2500)).unwrap();
        assert!((open - 500.0).abs() < 0.001);
    }

    #[test]
    fn test_visibility_clock_starting_hidden() {
        let mut clock = VisibilityClock::new(Visibility::Hidden, Instant::now());
        assert!(clock.hidden_at(Instant::now()).is_none());
    }
}
