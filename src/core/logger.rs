//! The exam logger: lifecycle, buffering and flush scheduling.
//!
//! A [`Logger`] is built once per test-taking page view. `start()` installs the
//! capture listeners, starts the flush timer and records PAGELOAD. `stop()`
//! tears all of that down and forces a final flush. Batches already handed to
//! delivery keep retrying after `stop()`.

use super::buffer::{EventBuffer, FlushPolicy};
use super::delivery::{Batch, DeliveryObserver, DeliveryOutcome, DeliveryStatus, DeliveryTask};
use crate::capture::{
    iso_timestamp, CaptureListener, CapturedEvent, EventSource, EventType, Recorder,
};
use crate::config::{ConfigError, LoggerConfig};
use crate::observer::{DebugFeed, EventObserver};
use crate::stats::TelemetryStats;
use crate::transport::{Transport, TransportError};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Logger errors.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("logger is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct LoggerState {
    buffer: EventBuffer,
    last_sent_at: Instant,
    capture: Option<CaptureListener>,
    timer: Option<CancellationToken>,
    runtime: Option<Handle>,
}

struct LoggerInner {
    this: Weak<LoggerInner>,
    config: LoggerConfig,
    policy: FlushPolicy,
    transport: Arc<dyn Transport>,
    source: Arc<dyn EventSource>,
    observers: Vec<EventObserver>,
    debug_feed: Option<DebugFeed>,
    stats: TelemetryStats,
    state: Mutex<LoggerState>,
    deliveries: Mutex<Vec<DeliveryTask>>,
    delivery_root: Mutex<CancellationToken>,
    next_batch_id: AtomicU64,
}

impl LoggerInner {
    fn push(&self, event_type: EventType, event_data: Value) {
        let event = CapturedEvent::new(event_type, event_data, self.config.page_id.clone());
        if self.config.debug {
            tracing::debug!(event_type = %event.event_type, data = %event.event_data, "event recorded");
        }

        self.state.lock().buffer.push(event.clone());
        self.stats.record_event();

        if let Some(feed) = &self.debug_feed {
            feed.push(&event);
        }
        for observer in &self.observers {
            observer(&event);
        }

        self.maybe_flush(false);
    }

    /// Cut and dispatch one batch if the policy says a flush is due.
    fn maybe_flush(&self, force: bool) {
        let (batch, runtime) = {
            let mut state = self.state.lock();
            let since = Instant::now().saturating_duration_since(state.last_sent_at);
            if !self.policy.is_due(state.buffer.len(), since, force) {
                return;
            }

            let Some(runtime) = state.runtime.clone().or_else(|| Handle::try_current().ok())
            else {
                tracing::warn!(
                    buffered = state.buffer.len(),
                    "no runtime to deliver on, events stay buffered"
                );
                return;
            };

            let events = state.buffer.take_batch(self.policy.max_batch_size);
            state.last_sent_at = Instant::now();
            (events, runtime)
        };

        let id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        let batch = match Batch::new(id, batch) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(batch = id, error = %e, "failed to encode batch, events dropped");
                return;
            }
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };

        self.stats.record_batch_flushed();
        tracing::debug!(batch = id, events = batch.len(), force, "flushing batch");

        let cancel = self.delivery_root.lock().child_token();
        let task = DeliveryTask::spawn(
            &runtime,
            Arc::clone(&self.transport),
            self.config.endpoint.clone(),
            batch,
            this,
            cancel,
        );

        let mut deliveries = self.deliveries.lock();
        deliveries.retain(|task| !task.is_finished());
        deliveries.push(task);
    }
}

impl Recorder for LoggerInner {
    fn record(&self, event_type: EventType, event_data: Value) {
        self.push(event_type, event_data);
    }

    fn flush_now(&self) {
        self.maybe_flush(true);
    }
}

impl DeliveryObserver for LoggerInner {
    fn on_attempt(&self, _batch: &Batch, _attempt: u32) {
        self.stats.record_attempt();
        self.state.lock().last_sent_at = Instant::now();
    }

    fn on_failure(&self, batch: &Batch, attempt: u32, error: &TransportError) {
        tracing::warn!(
            batch = batch.id(),
            attempt,
            error = %error,
            "telemetry delivery failed, retrying"
        );
        self.stats.record_failure();
        self.push(
            EventType::NetworkError,
            json!({ "occuredAt": iso_timestamp(Utc::now()) }),
        );
    }

    fn on_delivered(&self, batch: &Batch, attempts: u32) {
        tracing::debug!(batch = batch.id(), attempts, "telemetry batch delivered");
        self.stats.record_delivered();
    }
}

/// Builder for [`Logger`].
pub struct LoggerBuilder {
    config: LoggerConfig,
    observers: Vec<EventObserver>,
}

impl LoggerBuilder {
    /// Add an observer called with every recorded event.
    pub fn observer(mut self, observer: EventObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(
        self,
        transport: Arc<dyn Transport>,
        source: Arc<dyn EventSource>,
    ) -> Result<Logger, LoggerError> {
        self.config.validate()?;

        let debug_feed =
            (self.config.debug && self.config.include_debug_widget).then(DebugFeed::new);
        let policy = FlushPolicy::from_config(&self.config);
        let config = self.config;
        let observers = self.observers;

        let inner = Arc::new_cyclic(|this| LoggerInner {
            this: this.clone(),
            config,
            policy,
            transport,
            source,
            observers,
            debug_feed,
            stats: TelemetryStats::new(),
            state: Mutex::new(LoggerState {
                buffer: EventBuffer::new(),
                last_sent_at: Instant::now(),
                capture: None,
                timer: None,
                runtime: None,
            }),
            deliveries: Mutex::new(Vec::new()),
            delivery_root: Mutex::new(CancellationToken::new()),
            next_batch_id: AtomicU64::new(1),
        });

        Ok(Logger { inner })
    }
}

/// Captures integrity signals for one page view and delivers them in batches.
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn builder(config: LoggerConfig) -> LoggerBuilder {
        LoggerBuilder {
            config,
            observers: Vec::new(),
        }
    }

    /// Build a logger with no observers.
    pub fn new(
        config: LoggerConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn EventSource>,
    ) -> Result<Self, LoggerError> {
        Self::builder(config).build(transport, source)
    }

    /// Attach listeners, start the flush timer and record PAGELOAD.
    pub fn start(&self) -> Result<(), LoggerError> {
        let runtime = Handle::try_current().map_err(|_| LoggerError::NoRuntime)?;

        {
            let mut state = self.inner.state.lock();
            if state.capture.is_some() {
                return Err(LoggerError::AlreadyRunning);
            }

            let recorder: Weak<dyn Recorder> = self.inner.this.clone();
            state.capture = Some(CaptureListener::install(
                Arc::clone(&self.inner.source),
                recorder,
                runtime.clone(),
            ));
            state.timer = Some(self.spawn_timer(&runtime));
            state.runtime = Some(runtime);
        }

        let page = self.inner.source.page_state();
        tracing::info!(
            page_id = %self.inner.config.page_id,
            endpoint = %self.inner.config.endpoint,
            "exam logger started"
        );
        self.inner.push(
            EventType::PageLoad,
            json!({
                "url": page.url,
                "w": page.viewport.width,
                "h": page.viewport.height,
                "tz": page.timezone.name(),
            }),
        );
        Ok(())
    }

    fn spawn_timer(&self, runtime: &Handle) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let inner = self.inner.this.clone();
        let period = self.inner.config.send_interval;

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.maybe_flush(false);
                    }
                }
            }
        });

        token
    }

    /// Detach listeners, stop the timer and force a final flush.
    ///
    /// Calling this on a stopped logger does nothing.
    pub fn stop(&self) {
        let (capture, timer) = {
            let mut state = self.inner.state.lock();
            (state.capture.take(), state.timer.take())
        };
        let Some(capture) = capture else {
            return;
        };

        capture.remove();
        if let Some(timer) = timer {
            timer.cancel();
        }

        self.inner.maybe_flush(true);
        if let Some(feed) = &self.inner.debug_feed {
            feed.clear();
        }
        tracing::info!(page_id = %self.inner.config.page_id, "exam logger stopped");
    }

    pub fn running(&self) -> bool {
        self.inner.state.lock().capture.is_some()
    }

    /// Record a host event, such as TESTSTART or QUESTIONSWITCHED.
    pub fn record(&self, event_type: EventType, event_data: Value) {
        self.inner.push(event_type, event_data);
    }

    /// Force a flush of up to one batch.
    pub fn flush(&self) {
        self.inner.maybe_flush(true);
    }

    pub fn page_id(&self) -> &str {
        &self.inner.config.page_id
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    /// Events waiting in the buffer, oldest first.
    pub fn buffered(&self) -> Vec<CapturedEvent> {
        self.inner.state.lock().buffer.iter().cloned().collect()
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Listeners installed by the running logger.
    pub fn listener_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .capture
            .as_ref()
            .map_or(0, |capture| capture.registrations().len())
    }

    /// Deliveries that have not finished yet.
    pub fn deliveries(&self) -> Vec<DeliveryStatus> {
        let mut deliveries = self.inner.deliveries.lock();
        deliveries.retain(|task| !task.is_finished());
        deliveries.iter().map(DeliveryTask::status).collect()
    }

    /// Cancel every delivery in progress. Later batches are unaffected.
    pub fn abort_deliveries(&self) {
        let previous = std::mem::take(&mut *self.inner.delivery_root.lock());
        previous.cancel();
        let aborted = self.inner.deliveries.lock().len();
        tracing::info!(deliveries = aborted, "telemetry deliveries aborted");
    }

    /// Wait until every delivery started so far, and any started meanwhile,
    /// has ended.
    pub async fn wait_for_deliveries(&self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let pending = std::mem::take(&mut *self.inner.deliveries.lock());
            if pending.is_empty() {
                return outcomes;
            }
            for task in pending {
                outcomes.push(task.join().await);
            }
        }
    }

    pub fn stats(&self) -> &TelemetryStats {
        &self.inner.stats
    }

    /// Recent events for the debug widget, newest first.
    pub fn debug_feed(&self) -> Option<Vec<String>> {
        self.inner.debug_feed.as_ref().map(DebugFeed::lines)
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.stop();
    }
}
