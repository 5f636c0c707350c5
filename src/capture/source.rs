//! Injectable signal sources.
//!
//! The logger never touches a page directly. It subscribes handlers on an
//! [`EventSource`], which a host backs with a real browser bridge, a webview
//! message channel, or the in-memory [`MemoryEventSource`].

use super::signal::{PageState, Signal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback invoked for each dispatched signal.
pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// The object a listener is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTarget {
    Document,
    Window,
}

/// Listener options. Only the phase participates in listener identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerOptions {
    /// Observe during the capture phase, before page content can stop it
    pub capture: bool,
}

impl ListenerOptions {
    pub const CAPTURE: ListenerOptions = ListenerOptions { capture: true };
    pub const BUBBLE: ListenerOptions = ListenerOptions { capture: false };
}

/// A source of page signals.
pub trait EventSource: Send + Sync {
    /// Attach `handler` for `name` on `target`.
    fn subscribe(
        &self,
        target: SignalTarget,
        name: &str,
        handler: SignalHandler,
        options: ListenerOptions,
    );

    /// Detach a handler previously attached with the same target, name and
    /// phase. Unknown registrations are ignored.
    fn unsubscribe(
        &self,
        target: SignalTarget,
        name: &str,
        handler: &SignalHandler,
        options: ListenerOptions,
    );

    /// Current page state.
    fn page_state(&self) -> PageState;
}

/// An installed listener, kept so teardown removes exactly what was added.
#[derive(Clone)]
pub struct ListenerRegistration {
    pub target: SignalTarget,
    pub name: &'static str,
    pub handler: SignalHandler,
    pub options: ListenerOptions,
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("target", &self.target)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Handler identity: same allocation, regardless of vtable.
pub fn same_handler(a: &SignalHandler, b: &SignalHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct Listener {
    target: SignalTarget,
    name: String,
    handler: SignalHandler,
    options: ListenerOptions,
}

impl Listener {
    fn matches(
        &self,
        target: SignalTarget,
        name: &str,
        handler: &SignalHandler,
        options: ListenerOptions,
    ) -> bool {
        self.target == target
            && self.name == name
            && self.options.capture == options.capture
            && same_handler(&self.handler, handler)
    }
}

/// An event source driven by explicit [`dispatch`](Self::dispatch) calls.
pub struct MemoryEventSource {
    listeners: Mutex<Vec<Listener>>,
    state: Mutex<PageState>,
}

impl MemoryEventSource {
    pub fn new(state: PageState) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            state: Mutex::new(state),
        }
    }

    /// Mutate the page state seen by handlers.
    pub fn update_state(&self, update: impl FnOnce(&mut PageState)) {
        update(&mut self.state.lock());
    }

    /// Deliver a signal to every matching listener, capture phase first.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, target: SignalTarget, name: &str, signal: &Signal) -> usize {
        let handlers: Vec<SignalHandler> = {
            let listeners = self.listeners.lock();
            let capture = listeners
                .iter()
                .filter(|l| l.target == target && l.name == name && l.options.capture);
            let bubble = listeners
                .iter()
                .filter(|l| l.target == target && l.name == name && !l.options.capture);
            capture.chain(bubble).map(|l| Arc::clone(&l.handler)).collect()
        };

        for handler in &handlers {
            handler(signal);
        }
        handlers.len()
    }

    /// Total attached listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Listeners attached for one target and name.
    pub fn listeners_for(&self, target: SignalTarget, name: &str) -> Vec<ListenerOptions> {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.target == target && l.name == name)
            .map(|l| l.options)
            .collect()
    }
}

impl Default for MemoryEventSource {
    fn default() -> Self {
        Self::new(PageState::default())
    }
}

impl EventSource for MemoryEventSource {
    fn subscribe(
        &self,
        target: SignalTarget,
        name: &str,
        handler: SignalHandler,
        options: ListenerOptions,
    ) {
        let mut listeners = self.listeners.lock();
        // Adding an identical listener twice is a no-op, as on the DOM.
        if listeners
            .iter()
            .any(|l| l.matches(target, name, &handler, options))
        {
            return;
        }
        listeners.push(Listener {
            target,
            name: name.to_string(),
            handler,
            options,
        });
    }

    fn unsubscribe(
        &self,
        target: SignalTarget,
        name: &str,
        handler: &SignalHandler,
        options: ListenerOptions,
    ) {
        self.listeners
            .lock()
            .retain(|l| !l.matches(target, name, handler, options));
    }

    fn page_state(&self) -> PageState {
        self.state.lock().clone()
    }
}
