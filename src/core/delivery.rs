//! Batch delivery with unlimited fixed-delay retry.
//!
//! Each flushed batch gets its own [`DeliveryTask`]. The request body is built
//! once when the batch is cut, so every attempt sends identical bytes. A failed
//! attempt is reported to the [`DeliveryObserver`] and retried after
//! [`RETRY_DELAY`]; there is no attempt cap and no backoff. Only the task's
//! cancellation token ends a chain early.

use crate::capture::CapturedEvent;
use crate::transport::{RequestOptions, Transport, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Gap between a failed attempt and the next one.
pub const RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Events cut from the buffer in one flush, with their request body.
#[derive(Debug, Clone)]
pub struct Batch {
    id: u64,
    events: Arc<[CapturedEvent]>,
    body: Value,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    events: &'a [CapturedEvent],
}

impl Batch {
    pub fn new(id: u64, events: Vec<CapturedEvent>) -> Result<Self, TransportError> {
        let events: Arc<[CapturedEvent]> = events.into();
        let body = serde_json::to_value(BatchBody { events: &events })
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        Ok(Self { id, events, body })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn events(&self) -> &[CapturedEvent] {
        &self.events
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// `{"events": [...]}`
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Callbacks from a running delivery chain.
pub trait DeliveryObserver: Send + Sync {
    /// Called right before each attempt, retries included.
    fn on_attempt(&self, batch: &Batch, attempt: u32);
    /// Called after a failed attempt, before the retry delay.
    fn on_failure(&self, batch: &Batch, attempt: u32, error: &TransportError);
    /// Called once when the endpoint accepts the batch.
    fn on_delivered(&self, batch: &Batch, attempts: u32);
}

/// How a delivery chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Cancelled { attempts } => {
                *attempts
            }
        }
    }
}

/// Point-in-time view of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryStatus {
    pub batch_id: u64,
    pub events: usize,
    pub attempts: u32,
    pub finished: bool,
}

/// A spawned retry chain for one batch.
#[derive(Debug)]
pub struct DeliveryTask {
    batch_id: u64,
    events: usize,
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
    handle: JoinHandle<DeliveryOutcome>,
}

impl DeliveryTask {
    /// Start delivering `batch` to `endpoint` on `runtime`.
    pub fn spawn(
        runtime: &Handle,
        transport: Arc<dyn Transport>,
        endpoint: String,
        batch: Batch,
        observer: Arc<dyn DeliveryObserver>,
        cancel: CancellationToken,
    ) -> Self {
        let attempts = Arc::new(AtomicU32::new(0));
        let batch_id = batch.id();
        let events = batch.len();
        let handle = runtime.spawn(deliver(
            transport,
            endpoint,
            batch,
            observer,
            cancel.clone(),
            Arc::clone(&attempts),
        ));

        Self {
            batch_id,
            events,
            attempts,
            cancel,
            handle,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn status(&self) -> DeliveryStatus {
        DeliveryStatus {
            batch_id: self.batch_id,
            events: self.events,
            attempts: self.attempts(),
            finished: self.is_finished(),
        }
    }

    /// Stop retrying. An attempt in flight is abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the chain to end.
    pub async fn join(self) -> DeliveryOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(batch = self.batch_id, error = %e, "delivery task ended abnormally");
                DeliveryOutcome::Cancelled {
                    attempts: self.attempts.load(Ordering::SeqCst),
                }
            }
        }
    }
}

async fn deliver(
    transport: Arc<dyn Transport>,
    endpoint: String,
    batch: Batch,
    observer: Arc<dyn DeliveryObserver>,
    cancel: CancellationToken,
    attempts: Arc<AtomicU32>,
) -> DeliveryOutcome {
    loop {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        observer.on_attempt(&batch, attempt);

        let options = RequestOptions::post_json(batch.body().clone())
            .with_keepalive()
            .with_credentials();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return DeliveryOutcome::Cancelled { attempts: attempt },
            result = transport.request(&endpoint, options) => result,
        };

        match result {
            Ok(_) => {
                observer.on_delivered(&batch, attempt);
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(error) => {
                observer.on_failure(&batch, attempt, &error);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return DeliveryOutcome::Cancelled { attempts: attempt },
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}
