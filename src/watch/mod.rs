//! The watch source: where records and change notifications come from.
//!
//! The engine consumes this interface; it never implements the remote
//! side. A real deployment backs it with an API client; tests and the
//! demo binary use the in-memory source.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::record::{Record, WatchEvent};

pub use memory::{MemorySource, MemorySourceHandle};

/// A source of records and change notifications for one logical
/// collection.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    /// Full listing of existing records, used to seed the local cache.
    async fn list(&self) -> Result<Vec<Record>>;

    /// Open the notification stream. Events delivered on the returned
    /// channel follow the state the listing captured.
    async fn events(&self) -> Result<mpsc::Receiver<WatchEvent>>;
}
