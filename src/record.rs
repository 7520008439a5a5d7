//! Resource records and the watch events that carry them.
//!
//! Records are owned by the watch source. The engine never mutates record
//! identity or version; it only reacts to what the source delivers.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::key::ObjectKey;

/// A mutable resource record as the watch source sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Namespace the record lives in. Empty for cluster-scoped records.
    #[serde(default)]
    pub namespace: String,

    pub name: String,

    /// Monotonically increasing version token, bumped by the source on
    /// every real change. Resync replays carry an unchanged version.
    pub resource_version: u64,

    /// Desired/observed state. Opaque to the engine; the reconcile
    /// callback interprets it.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, resource_version: u64) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Derive the record's queue key. Fails on identities that would not
    /// survive the textual `"namespace/name"` form.
    pub fn key(&self) -> Result<ObjectKey, Error> {
        ObjectKey::try_from_parts(self.namespace.clone(), self.name.clone())
    }
}

/// What a delete notification carries. The source may have missed the real
/// delete and only know the identity, in which case it delivers a
/// final-state-unknown tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Deleted {
    Record(Record),
    Tombstone { key: ObjectKey },
}

impl Deleted {
    /// Key of the deleted identity, whether or not the final state is known.
    pub fn key(&self) -> Result<ObjectKey, Error> {
        match self {
            Deleted::Record(record) => record.key(),
            Deleted::Tombstone { key } => Ok(key.clone()),
        }
    }
}

/// One notification on the watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Added(Record),
    Modified(Record),
    Deleted(Deleted),
    /// Progress marker. Carries no record; the engine ignores it beyond
    /// noting the version.
    Bookmark { resource_version: u64 },
}
