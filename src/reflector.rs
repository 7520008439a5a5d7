//! Reflector: the single consumer of the watch source.
//!
//! Lists once to seed the store, flips cache readiness, then folds the
//! notification stream into the store while handing each change to the
//! event router. Cache updates and queue enqueues both originate here but
//! stay logically decoupled: the store never drives the queue.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::event::{EventKind, EventSink};
use crate::record::WatchEvent;
use crate::router::EventRouter;
use crate::store::Store;
use crate::watch::WatchSource;

pub struct Reflector {
    source: Arc<dyn WatchSource>,
    store: Store,
    router: EventRouter,
    events: EventSink,
}

impl Reflector {
    pub fn new(
        source: Arc<dyn WatchSource>,
        store: Store,
        router: EventRouter,
        events: EventSink,
    ) -> Self {
        Self {
            source,
            store,
            router,
            events,
        }
    }

    /// Run until the stop signal fires or the watch stream closes.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        // Open the stream before installing the listing so no notification
        // delivered between the two is missed.
        let mut rx = self.source.events().await?;
        let listing = self.source.list().await?;
        let count = listing.len();

        self.store.replace(listing.clone());
        self.events.emit(EventKind::CacheSynced { records: count });
        info!(records = count, "cache synced");

        // The initial listing is delivered as adds: on a cold start every
        // existing record is pending work.
        for record in &listing {
            self.router.on_add(record);
        }

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow_and_update() {
                        debug!("reflector stopping");
                        return Ok(());
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        debug!("watch stream closed");
                        return Ok(());
                    };
                    self.apply(event);
                }
            }
        }
    }

    fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(record) => {
                self.store.apply(record.clone());
                self.router.on_add(&record);
            }
            WatchEvent::Modified(new) => {
                // The previously mirrored version is the "old" side of the
                // update; a modify we never saw the add for degrades to one.
                match self.store.apply(new.clone()) {
                    Some(old) => self.router.on_update(&old, &new),
                    None => self.router.on_add(&new),
                }
            }
            WatchEvent::Deleted(deleted) => {
                if let Ok(key) = deleted.key() {
                    self.store.remove(&key);
                }
                self.router.on_delete(&deleted);
            }
            WatchEvent::Bookmark { resource_version } => {
                trace!(resource_version, "bookmark");
            }
        }
    }
}
