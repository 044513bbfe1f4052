// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed event bus with numbered envelopes, plus warning sinks.
//!
//! The bus is strictly observational: nothing that lands in a run
//! directory may depend on who is subscribed. `emit` stamps each event
//! with a per-bus monotonic sequence and fans out synchronously;
//! asynchronous handlers are spawned and tracked so `flush` can await
//! them and surface the first error.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod sink;

pub use sink::{ConsoleWarningSink, EventWarningSink, WarningSink};

use arb_core::RunWarning;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// Envelope version stamped on every event.
pub const ENVELOPE_VERSION: u32 = 1;

/// Errors from event delivery.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A strict handler failed.
    #[error("event handler failed: {0}")]
    Handler(String),
    /// An async handler panicked or was aborted.
    #[error("event handler task failed: {0}")]
    Join(String),
}

/// The events a run emits, in wire form.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run directory was created and execution is starting.
    RunStarted {
        /// Run identifier.
        run_id: String,
    },
    /// The trial plan was compiled and hashed.
    PlanCompiled {
        /// Planned trial count.
        k_planned: u32,
        /// Plan hash.
        plan_sha256: String,
    },
    /// A batch is about to execute.
    BatchStarted {
        /// Batch number, 0-based.
        batch_number: u32,
        /// Trials in the batch.
        size: u32,
    },
    /// A trial finished (any status).
    TrialCompleted {
        /// Trial identifier.
        trial_id: u32,
        /// Terminal status, wire form.
        status: String,
    },
    /// A batch finished and its records were written.
    BatchCompleted {
        /// Batch number, 0-based.
        batch_number: u32,
    },
    /// Convergence was evaluated for a batch.
    ConvergenceEvaluated {
        /// Batch number, 0-based.
        batch_number: u32,
        /// Whether the stop rule held.
        would_stop: bool,
        /// Whether the run stops after this batch.
        should_stop: bool,
    },
    /// An out-of-band warning.
    WarningRaised {
        /// The warning.
        warning: RunWarning,
    },
    /// The run finalized.
    RunCompleted {
        /// Run identifier.
        run_id: String,
        /// Stop reason, wire form.
        stop_reason: String,
    },
}

/// A stamped event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// The event payload.
    #[serde(flatten)]
    pub event: RunEvent,
    /// Envelope version.
    pub version: u32,
    /// Per-bus monotonic sequence, starting at 0.
    pub sequence: u64,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
}

/// Synchronous handler outcome.
pub type HandlerResult = Result<(), EventError>;

enum Delivery {
    /// Errors bubble out of `emit`.
    Strict(Box<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>),
    /// Errors go to the error callback; other handlers still run.
    Safe {
        handler: Box<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>,
        on_error: Box<dyn Fn(&EventError) + Send + Sync>,
    },
    /// Spawned; completion is awaited by `flush`.
    Async(Box<dyn Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync>),
}

/// The event bus.
///
/// Sequence numbers reset with each bus, and a run owns exactly one
/// bus, so `sequence` restarts at 0 between runs.
pub struct EventBus {
    sequence: AtomicU64,
    subscribers: Mutex<Vec<Delivery>>,
    in_flight: Mutex<Vec<JoinHandle<HandlerResult>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus with the sequence at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe a strict handler: its errors bubble out of [`emit`](Self::emit).
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.push(Delivery::Strict(Box::new(handler)));
    }

    /// Subscribe a safe handler: its errors go to `on_error` and do not
    /// disturb other subscribers.
    pub fn subscribe_safe<F, E>(&self, handler: F, on_error: E)
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
        E: Fn(&EventError) + Send + Sync + 'static,
    {
        self.push(Delivery::Safe {
            handler: Box::new(handler),
            on_error: Box::new(on_error),
        });
    }

    /// Subscribe an asynchronous handler. Each delivery is spawned;
    /// [`flush`](Self::flush) awaits completion.
    pub fn subscribe_async<F>(&self, handler: F)
    where
        F: Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        self.push(Delivery::Async(Box::new(handler)));
    }

    fn push(&self, delivery: Delivery) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(delivery);
    }

    /// Stamp and deliver an event to every subscriber.
    ///
    /// # Errors
    ///
    /// The first strict-handler error, after all subscribers were
    /// offered the event.
    pub fn emit(&self, event: RunEvent) -> HandlerResult {
        let envelope = Envelope {
            event,
            version: ENVELOPE_VERSION,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            emitted_at: Utc::now(),
        };
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        let mut first_error = None;
        for delivery in subscribers.iter() {
            match delivery {
                Delivery::Strict(handler) => {
                    if let Err(err) = handler(&envelope) {
                        first_error.get_or_insert(err);
                    }
                }
                Delivery::Safe { handler, on_error } => {
                    if let Err(err) = handler(&envelope) {
                        on_error(&err);
                    }
                }
                Delivery::Async(handler) => {
                    let fut = handler(envelope.clone());
                    let handle = tokio::spawn(fut);
                    self.in_flight
                        .lock()
                        .expect("in-flight lock poisoned")
                        .push(handle);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Await every in-flight asynchronous handler; surface the first
    /// error encountered.
    ///
    /// # Errors
    ///
    /// The first handler error or join failure.
    pub async fn flush(&self) -> HandlerResult {
        let handles: Vec<JoinHandle<HandlerResult>> = {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            in_flight.drain(..).collect()
        };
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join) => {
                    first_error.get_or_insert(EventError::Join(join.to_string()));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn started(run_id: &str) -> RunEvent {
        RunEvent::RunStarted {
            run_id: run_id.into(),
        }
    }

    #[tokio::test]
    async fn sequence_is_monotonic_from_zero() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |env| {
            sink.lock().unwrap().push(env.sequence);
            Ok(())
        });
        for i in 0..5 {
            bus.emit(started(&format!("r{i}"))).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(bus.emitted(), 5);
    }

    #[tokio::test]
    async fn strict_handler_error_bubbles() {
        let bus = EventBus::new();
        bus.subscribe(|_| Err(EventError::Handler("boom".into())));
        let err = bus.emit(started("r")).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn safe_handler_error_is_isolated() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        bus.subscribe_safe(
            |_| Err(EventError::Handler("ignored".into())),
            move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            },
        );
        let d = Arc::clone(&delivered);
        bus.subscribe(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit(started("r")).unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1, "later handler still ran");
    }

    #[tokio::test]
    async fn flush_awaits_async_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe_async(move |_| {
            let h = Arc::clone(&h);
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        bus.emit(started("a")).unwrap();
        bus.emit(started("b")).unwrap();
        bus.flush().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_surfaces_first_async_error() {
        let bus = EventBus::new();
        bus.subscribe_async(|env| {
            Box::pin(async move {
                if env.sequence == 1 {
                    Err(EventError::Handler("second delivery".into()))
                } else {
                    Ok(())
                }
            })
        });
        bus.emit(started("a")).unwrap();
        bus.emit(started("b")).unwrap();
        let err = bus.flush().await.unwrap_err();
        assert!(err.to_string().contains("second delivery"));
    }

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope {
            event: RunEvent::BatchStarted {
                batch_number: 3,
                size: 8,
            },
            version: ENVELOPE_VERSION,
            sequence: 41,
            emitted_at: Utc::now(),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "batch_started");
        assert_eq!(v["version"], 1);
        assert_eq!(v["sequence"], 41);
        assert_eq!(v["batch_number"], 3);
    }
}
