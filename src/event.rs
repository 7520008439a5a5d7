//! Structured events emitted by the engine as keys move through it.
//!
//! Consumers subscribe to the event stream to build dashboards, alerting,
//! or audit logs. This is also where per-key reconcile failures surface
//! without ever crashing the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::key::ObjectKey;

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Monotonic sequence number. Consumers can detect gaps after lagging
    /// behind the broadcast channel.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The local cache completed its initial listing.
    CacheSynced { records: usize },
    /// A key was enqueued (possibly coalesced into an existing entry).
    Enqueued { key: ObjectKey },
    /// An identity could not be turned into a key and was dropped.
    KeyDropped { reason: String },
    ReconcileStarted { key: ObjectKey },
    ReconcileSucceeded { key: ObjectKey },
    ReconcileFailed {
        key: ObjectKey,
        error: String,
        requeues: u32,
    },
    /// Shutdown requested; the queue is draining.
    ShuttingDown,
}

/// Fan-out for engine events. Cheap to clone; all clones share one
/// sequence counter and one broadcast channel.
#[derive(Clone)]
pub struct EventSink {
    seq: Arc<AtomicU64>,
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    /// Create a sink with the given per-subscriber buffer capacity.
    /// Slow subscribers lag (and observe a gap in `seq`) rather than
    /// blocking the engine.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never fails; with no subscribers the event is simply
    /// not delivered.
    pub fn emit(&self, kind: EventKind) {
        let event = EngineEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
