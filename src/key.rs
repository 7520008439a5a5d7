//! Object keys. The only thing the work queue ever holds.
//!
//! A key names an identity, not a snapshot. Enqueuing identity-only keys
//! means rapid changes to the same record coalesce into one pending unit of
//! work, and workers always re-read current state from the cache.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identity of a record: `(namespace, name)`, with structural equality
/// and hashing. Renders as `"namespace/name"`, or bare `name` when the
/// namespace is empty (cluster-scoped records).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Build a key, validating the parts. Names must be non-empty and must
    /// not contain `/`, otherwise the textual form would not round-trip.
    pub fn try_from_parts(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        let namespace = namespace.into();
        let name = name.into();
        if name.is_empty() {
            return Err(Error::MalformedKey(format!("{namespace}/")));
        }
        if name.contains('/') || namespace.contains('/') {
            return Err(Error::MalformedKey(format!("{namespace}/{name}")));
        }
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    /// Parse `"namespace/name"` or bare `"name"`. Anything with more than
    /// one `/`, or an empty name part, is malformed.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self {
                namespace: String::new(),
                name: name.to_string(),
            }),
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::MalformedKey(s.to_string())),
        }
    }
}
