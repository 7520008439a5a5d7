//! In-memory watch source for tests and the demo binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::record::{Deleted, Record, WatchEvent};

use super::WatchSource;

type Snapshot = Arc<Mutex<HashMap<ObjectKey, Record>>>;

/// A watch source backed by a mutable in-process collection. Changes made
/// through the [`MemorySourceHandle`] show up both in subsequent `list`
/// calls and on the event stream.
pub struct MemorySource {
    snapshot: Snapshot,
    rx: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
}

/// Producer half: mutate the collection and emit matching watch events.
#[derive(Clone)]
pub struct MemorySourceHandle {
    snapshot: Snapshot,
    tx: mpsc::Sender<WatchEvent>,
}

impl MemorySource {
    pub fn new(initial: Vec<Record>) -> (Self, MemorySourceHandle) {
        let mut map = HashMap::new();
        for record in initial {
            if let Ok(key) = record.key() {
                map.insert(key, record);
            }
        }
        let snapshot: Snapshot = Arc::new(Mutex::new(map));
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                snapshot: Arc::clone(&snapshot),
                rx: Mutex::new(Some(rx)),
            },
            MemorySourceHandle { snapshot, tx },
        )
    }
}

#[async_trait]
impl WatchSource for MemorySource {
    async fn list(&self) -> Result<Vec<Record>> {
        let snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshot.values().cloned().collect())
    }

    async fn events(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| Error::Watch("event stream already taken".to_string()))
    }
}

impl MemorySourceHandle {
    pub async fn add(&self, record: Record) {
        self.store(record.clone());
        self.send(WatchEvent::Added(record)).await;
    }

    pub async fn modify(&self, record: Record) {
        self.store(record.clone());
        self.send(WatchEvent::Modified(record)).await;
    }

    pub async fn delete(&self, key: &ObjectKey) {
        let removed = self
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        let deleted = match removed {
            Some(record) => Deleted::Record(record),
            None => Deleted::Tombstone { key: key.clone() },
        };
        self.send(WatchEvent::Deleted(deleted)).await;
    }

    /// Deliver a final-state-unknown tombstone, as a source that missed
    /// the real delete would.
    pub async fn delete_unknown(&self, key: &ObjectKey) {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        self.send(WatchEvent::Deleted(Deleted::Tombstone { key: key.clone() }))
            .await;
    }

    pub async fn bookmark(&self, resource_version: u64) {
        self.send(WatchEvent::Bookmark { resource_version }).await;
    }

    fn store(&self, record: Record) {
        if let Ok(key) = record.key() {
            self.snapshot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, record);
        }
    }

    async fn send(&self, event: WatchEvent) {
        // Receiver dropped means the engine is gone; nothing to notify.
        let _ = self.tx.send(event).await;
    }
}
