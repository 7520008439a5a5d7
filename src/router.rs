//! Event router: turns watch notifications into queue keys.
//!
//! Handlers run on the reflector's delivery task and must stay fast and
//! non-blocking: they only derive a key and enqueue it. Coalescing of
//! rapid changes is the queue's dedup property, not the router's job.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::event::{EventKind, EventSink};
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::record::{Deleted, Record};

pub struct EventRouter {
    queue: Arc<WorkQueue>,
    events: EventSink,
}

impl EventRouter {
    pub fn new(queue: Arc<WorkQueue>, events: EventSink) -> Self {
        Self { queue, events }
    }

    pub fn on_add(&self, record: &Record) {
        if let Some(key) = self.derive_key(record.key()) {
            self.enqueue(key);
        }
    }

    /// Resync replays carry an unchanged resource version and are
    /// suppressed; everything else enqueues the key of the new record.
    pub fn on_update(&self, old: &Record, new: &Record) {
        if old.resource_version == new.resource_version {
            debug!(
                name = %new.name,
                resource_version = new.resource_version,
                "no-op update suppressed"
            );
            return;
        }
        if let Some(key) = self.derive_key(new.key()) {
            self.enqueue(key);
        }
    }

    /// Deletes enqueue like adds, even when the source only delivers a
    /// final-state-unknown tombstone. The worker finds nothing in the
    /// cache and treats the key as already converged.
    pub fn on_delete(&self, deleted: &Deleted) {
        if let Some(key) = self.derive_key(deleted.key()) {
            self.enqueue(key);
        }
    }

    fn enqueue(&self, key: ObjectKey) {
        self.queue.add_rate_limited(key.clone());
        self.events.emit(EventKind::Enqueued { key });
    }

    /// Malformed identities are logged and dropped here. They never enter
    /// the queue, so retrying is off the table by construction.
    fn derive_key(&self, key: crate::error::Result<ObjectKey>) -> Option<ObjectKey> {
        match key {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(%err, "dropping notification with underivable key");
                self.events.emit(EventKind::KeyDropped {
                    reason: err.to_string(),
                });
                None
            }
        }
    }
}
