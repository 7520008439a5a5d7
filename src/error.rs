//! Error types for relevel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The text does not decode to a `(namespace, name)` identity.
    /// Non-retryable: the key itself is corrupt, retrying cannot help.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A reconcile attempt failed. Retryable with backoff.
    #[error("error syncing '{key}': {reason}")]
    Reconcile { key: String, reason: String },

    /// The local cache did not complete its initial listing before the
    /// stop signal or deadline. Fatal to `Controller::run`.
    #[error("timed out waiting for cache to sync")]
    CacheSyncTimeout,

    #[error("watch source error: {0}")]
    Watch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
