//! The controller: startup ordering, worker pool, coordinated shutdown.
//!
//! Wires the reflector, store, queue, and reconcile callback together.
//! Workers never start before the cache has synced, and shutdown lets
//! in-flight reconciles finish naturally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::event::{EventKind, EventSink};
use crate::key::ObjectKey;
use crate::queue::{RateLimiterConfig, WorkQueue};
use crate::reflector::Reflector;
use crate::router::EventRouter;
use crate::store::Store;
use crate::telemetry::reconcile::{record_outcome, start_reconcile_span};
use crate::watch::WatchSource;

/// The pluggable convergence unit. Given an identity, read current state
/// from the local cache and act on it.
///
/// Contract: a key missing from the cache means already-deleted; succeed
/// with no action. Implementations must be safe to invoke repeatedly for
/// the same identity (never two at once; the queue guarantees that) and
/// must re-derive all action from current cache content, never from state
/// captured at enqueue time.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long `run` waits for the initial cache sync before giving up.
    /// `None` waits until the stop signal.
    pub sync_timeout: Option<Duration>,
    /// Backoff tuning for the work queue.
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Some(Duration::from_secs(30)),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

pub struct Controller {
    source: Arc<dyn WatchSource>,
    reconciler: Arc<dyn Reconcile>,
    store: Store,
    queue: Arc<WorkQueue>,
    events: EventSink,
    config: ControllerConfig,
}

impl Controller {
    /// Build a controller. The store is passed in (rather than created
    /// here) because the reconcile callback reads the same cache.
    pub fn new(
        source: Arc<dyn WatchSource>,
        store: Store,
        reconciler: Arc<dyn Reconcile>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            source,
            reconciler,
            store,
            queue: Arc::new(WorkQueue::new(config.rate_limiter.clone())),
            events: EventSink::default(),
            config,
        }
    }

    /// The local cache. Hand this to the reconcile callback.
    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Subscribe-side handle for the engine event stream.
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    /// Run the control loop: sync the cache, start `worker_count` workers,
    /// block until `stop`, then drain and join.
    ///
    /// Fails fast with [`Error::CacheSyncTimeout`] if the cache does not
    /// sync before cancellation or the configured deadline: reconciling
    /// against an unsynced cache would act on incomplete state.
    pub async fn run(&self, worker_count: usize, stop: watch::Receiver<bool>) -> Result<()> {
        info!("starting control loop");

        let router = EventRouter::new(Arc::clone(&self.queue), self.events.clone());
        let reflector = Reflector::new(
            Arc::clone(&self.source),
            self.store.clone(),
            router,
            self.events.clone(),
        );
        let mut reflector_task = tokio::spawn(reflector.run(stop.clone()));

        info!("waiting for cache to sync");
        let synced = match self.config.sync_timeout {
            Some(deadline) => {
                tokio::time::timeout(deadline, self.store.wait_for_sync(stop.clone()))
                    .await
                    .unwrap_or(false)
            }
            None => self.store.wait_for_sync(stop.clone()).await,
        };

        if !synced {
            self.queue.shut_down();
            // The reflector may already know the real reason (listing or
            // watch failure); prefer that over the generic timeout.
            if reflector_task.is_finished() {
                if let Ok(Err(err)) = (&mut reflector_task).await {
                    return Err(err);
                }
            } else {
                reflector_task.abort();
            }
            return Err(Error::CacheSyncTimeout);
        }

        info!(workers = worker_count, "starting workers");
        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let events = self.events.clone();
            workers.spawn(async move {
                worker_loop(worker, queue, reconciler, events).await;
            });
        }

        // Block until the stop signal fires.
        let mut stop = stop;
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            if stop.changed().await.is_err() {
                break;
            }
        }

        info!("shutting down workers");
        self.events.emit(EventKind::ShuttingDown);
        self.queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(%err, "worker task panicked");
            }
        }
        if let Ok(Err(err)) = reflector_task.await {
            error!(%err, "reflector exited with error");
        }

        info!("control loop stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconcile>,
    events: EventSink,
) {
    while let Some(key) = queue.get().await {
        let span = start_reconcile_span(&key, worker);
        process_key(&key, &queue, reconciler.as_ref(), &events)
            .instrument(span)
            .await;
        // Always release, whatever the outcome. A key that went dirty
        // while in flight becomes deliverable again here.
        queue.done(&key);
    }
}

async fn process_key(
    key: &ObjectKey,
    queue: &WorkQueue,
    reconciler: &dyn Reconcile,
    events: &EventSink,
) {
    events.emit(EventKind::ReconcileStarted { key: key.clone() });

    match reconciler.reconcile(&key.namespace, &key.name).await {
        Ok(()) => {
            record_outcome("success");
            queue.forget(key);
            events.emit(EventKind::ReconcileSucceeded { key: key.clone() });
        }
        Err(cause) => {
            // Retryable: no forget, so the backoff keeps growing until a
            // success resets it. Convergence keeps being attempted for as
            // long as the record exists.
            record_outcome("requeued");
            queue.add_rate_limited(key.clone());
            let requeues = queue.requeues(key);
            let err = Error::Reconcile {
                key: key.to_string(),
                reason: cause.to_string(),
            };
            warn!(%err, requeues, "reconcile failed, requeued");
            events.emit(EventKind::ReconcileFailed {
                key: key.clone(),
                error: err.to_string(),
                requeues,
            });
        }
    }
}
