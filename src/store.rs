//! Local cache: an eventually-consistent, read-optimized mirror of the
//! remote record collection.
//!
//! The reflector is the only writer. Workers share the read path and see
//! "most recent version observed", not necessarily the absolute latest.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::debug;

use crate::key::ObjectKey;
use crate::record::Record;

/// Shared read mirror plus sync readiness. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    records: Arc<RwLock<HashMap<ObjectKey, Arc<Record>>>>,
    synced_tx: Arc<watch::Sender<bool>>,
}

impl Store {
    pub fn new() -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            synced_tx: Arc::new(synced_tx),
        }
    }

    /// Point lookup. `None` means not found; for a worker this reads as
    /// "already deleted".
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<Record>> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Number of records currently mirrored.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Has the initial listing landed?
    pub fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Block cooperatively until the initial listing completes or `stop`
    /// fires. Returns false on cancellation.
    pub async fn wait_for_sync(&self, mut stop: watch::Receiver<bool>) -> bool {
        let mut synced = self.synced_tx.subscribe();
        loop {
            if *synced.borrow_and_update() {
                return true;
            }
            if *stop.borrow_and_update() {
                return false;
            }
            tokio::select! {
                changed = synced.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = stop.changed() => {
                    // A dropped stop sender reads as cancellation.
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Install the initial listing and flip readiness. Reflector only.
    pub(crate) fn replace(&self, records: Vec<Record>) {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if let Ok(key) = record.key() {
                map.insert(key, Arc::new(record));
            }
        }
        let count = map.len();
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = map;
        debug!(records = count, "initial listing installed");
        self.synced_tx.send_replace(true);
    }

    /// Upsert one record. Returns the previously mirrored version, which
    /// the router needs as the "old" side of an update.
    pub(crate) fn apply(&self, record: Record) -> Option<Arc<Record>> {
        let key = record.key().ok()?;
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(record))
    }

    pub(crate) fn remove(&self, key: &ObjectKey) -> Option<Arc<Record>> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
