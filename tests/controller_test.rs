//! End-to-end controller tests: lifecycle, retry with backoff, cache sync
//! failure modes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relevel::controller::{Controller, ControllerConfig, Reconcile};
use relevel::error::{Error, Result};
use relevel::event::EventKind;
use relevel::key::ObjectKey;
use relevel::queue::RateLimiterConfig;
use relevel::record::{Record, WatchEvent};
use relevel::store::Store;
use relevel::watch::{MemorySource, WatchSource};
use tokio::sync::{mpsc, watch};

type DynError = Box<dyn std::error::Error + Send + Sync>;

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        sync_timeout: Some(Duration::from_secs(5)),
        rate_limiter: RateLimiterConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
        },
    }
}

/// Reconciler that checks the cache and records every invocation.
struct RecordingReconciler {
    store: Store,
    calls: Mutex<Vec<(String, bool)>>, // (key, found in cache)
}

#[async_trait]
impl Reconcile for RecordingReconciler {
    async fn reconcile(&self, namespace: &str, name: &str) -> std::result::Result<(), DynError> {
        let key = ObjectKey::try_from_parts(namespace, name)?;
        let found = self.store.get(&key).is_some();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_string(), found));
        // Key not in cache: already deleted, succeed with no action.
        Ok(())
    }
}

impl RecordingReconciler {
    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Fails a key the first `failures` times, then succeeds. Stamps each
/// invocation with the (virtual) time it happened.
struct FlakyReconciler {
    failures: u32,
    attempts: AtomicU32,
    seen_at: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Reconcile for FlakyReconciler {
    async fn reconcile(&self, _namespace: &str, _name: &str) -> std::result::Result<(), DynError> {
        self.seen_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tokio::time::Instant::now());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(format!("transient error, attempt {attempt}").into())
        } else {
            Ok(())
        }
    }
}

/// A source whose listing never completes; sync can never succeed.
struct StalledSource;

#[async_trait]
impl WatchSource for StalledSource {
    async fn list(&self) -> Result<Vec<Record>> {
        std::future::pending().await
    }

    async fn events(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

/// A source whose listing fails outright.
struct BrokenSource;

#[async_trait]
impl WatchSource for BrokenSource {
    async fn list(&self) -> Result<Vec<Record>> {
        Err(Error::Watch("listing failed".to_string()))
    }

    async fn events(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reconciles_listing_then_treats_deleted_key_as_noop() {
    let (source, handle) = MemorySource::new(vec![Record::new("ns", "foo", 1)]);
    let store = Store::new();
    let reconciler = Arc::new(RecordingReconciler {
        store: store.clone(),
        calls: Mutex::new(Vec::new()),
    });

    let controller = Controller::new(
        Arc::new(source),
        store.clone(),
        reconciler.clone(),
        fast_config(),
    );
    let mut events = controller.events().subscribe();

    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(async move { controller.run(2, stop_rx).await });

    // First convergence: record present in the cache.
    loop {
        let event = events.recv().await.unwrap();
        if matches!(event.kind, EventKind::ReconcileSucceeded { .. }) {
            break;
        }
    }
    assert_eq!(reconciler.calls(), vec![("ns/foo".to_string(), true)]);

    // External deletion races the queue: the callback sees NotFound and
    // succeeds with no action.
    handle.delete(&"ns/foo".parse().unwrap()).await;
    loop {
        let event = events.recv().await.unwrap();
        if matches!(event.kind, EventKind::ReconcileSucceeded { .. }) {
            break;
        }
    }
    let calls = reconciler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], ("ns/foo".to_string(), false));

    stop_tx.send(true).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_reconcile_retries_with_growing_delay_until_success() {
    let (source, _handle) = MemorySource::new(vec![Record::new("ns", "foo", 1)]);
    let store = Store::new();
    let reconciler = Arc::new(FlakyReconciler {
        failures: 3,
        attempts: AtomicU32::new(0),
        seen_at: Mutex::new(Vec::new()),
    });

    let controller = Controller::new(Arc::new(source), store, reconciler.clone(), fast_config());
    let mut events = controller.events().subscribe();

    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(async move { controller.run(1, stop_rx).await });

    loop {
        let event = events.recv().await.unwrap();
        if matches!(event.kind, EventKind::ReconcileSucceeded { .. }) {
            break;
        }
    }

    // 3 failures then success: at least 4 deliveries.
    let stamps = reconciler
        .seen_at
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    assert_eq!(stamps.len(), 4);

    // Inter-delivery delay never shrinks across the failed attempts.
    let deltas: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in deltas.windows(2) {
        assert!(
            pair[1] >= pair[0],
            "backoff shrank: {:?} after {:?}",
            pair[1],
            pair[0]
        );
    }

    stop_tx.send(true).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failure_events_carry_the_syncing_error() {
    let (source, _handle) = MemorySource::new(vec![Record::new("ns", "foo", 1)]);
    let reconciler = Arc::new(FlakyReconciler {
        failures: 1,
        attempts: AtomicU32::new(0),
        seen_at: Mutex::new(Vec::new()),
    });

    let controller = Controller::new(Arc::new(source), Store::new(), reconciler, fast_config());
    let mut events = controller.events().subscribe();

    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(async move { controller.run(1, stop_rx).await });

    let error = loop {
        let event = events.recv().await.unwrap();
        if let EventKind::ReconcileFailed { key, error, requeues } = event.kind {
            assert_eq!(key.to_string(), "ns/foo");
            // Ingestion counted one rate-limited add, the failure a second.
            assert_eq!(requeues, 2);
            break error;
        }
    };
    assert_eq!(error, "error syncing 'ns/foo': transient error, attempt 1");

    stop_tx.send(true).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_control_loop_cleanly() {
    let (source, _handle) = MemorySource::new(Vec::new());
    let store = Store::new();
    let reconciler = Arc::new(RecordingReconciler {
        store: store.clone(),
        calls: Mutex::new(Vec::new()),
    });

    let controller = Controller::new(Arc::new(source), store, reconciler, fast_config());
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(async move { controller.run(3, stop_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();
    run.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Startup failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unsynced_cache_fails_run_with_timeout() {
    let controller = Controller::new(
        Arc::new(StalledSource),
        Store::new(),
        Arc::new(FlakyReconciler {
            failures: 0,
            attempts: AtomicU32::new(0),
            seen_at: Mutex::new(Vec::new()),
        }),
        ControllerConfig {
            sync_timeout: Some(Duration::from_millis(100)),
            ..ControllerConfig::default()
        },
    );

    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = controller.run(1, stop_rx).await.unwrap_err();
    assert!(matches!(err, Error::CacheSyncTimeout));
}

#[tokio::test(start_paused = true)]
async fn broken_listing_surfaces_the_watch_error() {
    let controller = Controller::new(
        Arc::new(BrokenSource),
        Store::new(),
        Arc::new(FlakyReconciler {
            failures: 0,
            attempts: AtomicU32::new(0),
            seen_at: Mutex::new(Vec::new()),
        }),
        ControllerConfig {
            sync_timeout: Some(Duration::from_millis(100)),
            ..ControllerConfig::default()
        },
    );

    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = controller.run(1, stop_rx).await.unwrap_err();
    assert!(matches!(err, Error::Watch(_)), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_sync_fails_fast() {
    let controller = Controller::new(
        Arc::new(StalledSource),
        Store::new(),
        Arc::new(FlakyReconciler {
            failures: 0,
            attempts: AtomicU32::new(0),
            seen_at: Mutex::new(Vec::new()),
        }),
        ControllerConfig {
            sync_timeout: None,
            ..ControllerConfig::default()
        },
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();
    let err = controller.run(1, stop_rx).await.unwrap_err();
    assert!(matches!(err, Error::CacheSyncTimeout));
}
