//! Event router behavior: rate-limited ingestion, no-op update
//! suppression, tombstone handling, malformed identities.

use std::sync::Arc;
use std::time::Duration;

use relevel::event::{EventKind, EventSink};
use relevel::key::ObjectKey;
use relevel::queue::{RateLimiterConfig, WorkQueue};
use relevel::record::{Deleted, Record};
use relevel::router::EventRouter;

fn setup() -> (Arc<WorkQueue>, EventSink, EventRouter) {
    let queue = Arc::new(WorkQueue::new(RateLimiterConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_secs(1),
    }));
    let events = EventSink::new(64);
    let router = EventRouter::new(Arc::clone(&queue), events.clone());
    (queue, events, router)
}

async fn try_get(queue: &WorkQueue, wait: Duration) -> Option<ObjectKey> {
    tokio::time::timeout(wait, queue.get()).await.ok().flatten()
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn add_enqueues_the_record_key() {
    let (queue, _events, router) = setup();

    router.on_add(&Record::new("ns", "foo", 1));

    assert_eq!(queue.get().await, Some("ns/foo".parse().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn rapid_adds_coalesce_through_the_queue() {
    let (queue, _events, router) = setup();

    for version in 1..=4 {
        router.on_add(&Record::new("ns", "foo", version));
    }

    assert_eq!(queue.get().await, Some("ns/foo".parse().unwrap()));
    assert!(try_get(&queue, Duration::from_millis(50)).await.is_none());
}

// ---------------------------------------------------------------------------
// Update suppression
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resync_replay_with_same_version_never_enqueues() {
    let (queue, _events, router) = setup();

    let record = Record::new("ns", "foo", 7);
    router.on_update(&record, &record);

    // Past any conceivable backoff window: still nothing.
    assert!(try_get(&queue, Duration::from_secs(5)).await.is_none());
    assert_eq!(queue.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn real_update_enqueues_the_new_key() {
    let (queue, _events, router) = setup();

    let old = Record::new("ns", "foo", 7);
    let new = Record::new("ns", "foo", 8);
    router.on_update(&old, &new);

    assert_eq!(queue.get().await, Some("ns/foo".parse().unwrap()));
}

// ---------------------------------------------------------------------------
// Deletes and tombstones
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn delete_enqueues_like_add() {
    let (queue, _events, router) = setup();

    router.on_delete(&Deleted::Record(Record::new("ns", "foo", 3)));

    assert_eq!(queue.get().await, Some("ns/foo".parse().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn tombstone_delete_still_yields_a_key() {
    let (queue, _events, router) = setup();

    router.on_delete(&Deleted::Tombstone {
        key: "ns/foo".parse().unwrap(),
    });

    assert_eq!(queue.get().await, Some("ns/foo".parse().unwrap()));
}

// ---------------------------------------------------------------------------
// Malformed identities
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn underivable_key_is_dropped_and_reported() {
    let (queue, events, router) = setup();
    let mut rx = events.subscribe();

    router.on_add(&Record::new("ns", "bad/name", 1));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event.kind, EventKind::KeyDropped { .. }));
    assert!(try_get(&queue, Duration::from_millis(50)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn enqueues_are_visible_on_the_event_stream() {
    let (_queue, events, router) = setup();
    let mut rx = events.subscribe();

    router.on_add(&Record::new("ns", "foo", 1));

    let event = rx.recv().await.unwrap();
    match event.kind {
        EventKind::Enqueued { key } => assert_eq!(key.to_string(), "ns/foo"),
        other => panic!("expected Enqueued, got {other:?}"),
    }
}
