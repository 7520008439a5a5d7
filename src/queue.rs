//! The work queue: deduplicating, rate-limited, with in-flight tracking.
//!
//! All queue state lives behind one mutex; the dirty -> processing move in
//! [`WorkQueue::get`] happens atomically under it. That atomicity is the
//! queue's core correctness property: at most one worker ever holds a given
//! key in processing.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::key::ObjectKey;

/// Per-key exponential backoff tuning for [`WorkQueue::add_rate_limited`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay for a key's first rate-limited add. Doubles per requeue.
    pub base_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // The classic per-item controller rate limiter numbers.
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl RateLimiterConfig {
    /// Backoff for the nth consecutive requeue of a key (0-based).
    fn delay_for(&self, requeues: u32) -> Duration {
        let exp = requeues.min(63);
        self.base_delay
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// A key waiting out its backoff delay. Ordered by readiness so the
/// earliest deadline sits on top of the (min-)heap.
struct Waiting {
    ready_at: Instant,
    key: ObjectKey,
}

impl PartialEq for Waiting {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl Eq for Waiting {}

impl PartialOrd for Waiting {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiting {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the soonest deadline.
        other.ready_at.cmp(&self.ready_at)
    }
}

struct QueueState {
    /// FIFO of keys ready for delivery. Every entry is also in `dirty`.
    order: VecDeque<ObjectKey>,
    /// Pending keys. Membership here is the dedup: adding an
    /// already-dirty key is a no-op.
    dirty: HashSet<ObjectKey>,
    /// Keys currently owned by a worker.
    processing: HashSet<ObjectKey>,
    /// Keys waiting out a backoff delay before becoming dirty.
    waiting: BinaryHeap<Waiting>,
    /// Earliest pending deadline per delayed key. Heap entries that do
    /// not match this map are stale and get skipped on promotion.
    delayed: HashMap<ObjectKey, Instant>,
    /// Consecutive rate-limited requeues per key. Cleared by `forget`.
    requeues: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

impl QueueState {
    /// Make a key dirty and visible. The one place keys enter the queue.
    fn insert(&mut self, key: ObjectKey) {
        if self.shutting_down {
            return;
        }
        if !self.dirty.insert(key.clone()) {
            // Coalesced with a pending entry.
            return;
        }
        if self.processing.contains(&key) {
            // In flight: stays dirty, redelivered when the worker calls
            // done(). Not pushed to order now, so no second worker can
            // pick it up concurrently.
            return;
        }
        self.order.push_back(key);
    }

    /// Move keys whose backoff has elapsed into the dirty set.
    fn promote_due(&mut self, now: Instant) {
        while self
            .waiting
            .peek()
            .is_some_and(|w| w.ready_at <= now)
        {
            if let Some(w) = self.waiting.pop() {
                if self.delayed.get(&w.key) == Some(&w.ready_at) {
                    self.delayed.remove(&w.key);
                    self.insert(w.key);
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|w| w.ready_at)
    }
}

/// Deduplicating, rate-limited queue of pending keys.
///
/// Shared by the event router (producer side) and the worker pool
/// (consumer side) behind an `Arc`.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    config: RateLimiterConfig,
}

impl WorkQueue {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: BinaryHeap::new(),
                delayed: HashMap::new(),
                requeues: HashMap::new(),
                shutting_down: false,
            }),
            wake: Notify::new(),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a key immediately. Deduplicates against pending entries; a
    /// key currently being processed is marked for redelivery after its
    /// `done`. Accepted but ignored once shutdown has begun.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        state.insert(key);
        drop(state);
        self.wake.notify_waiters();
    }

    /// Enqueue a key after its backoff delay: base doubling per
    /// consecutive requeue, capped. Used both for normal ingestion (mild
    /// self-throttling) and retry-after-failure.
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let requeues = state.requeues.entry(key.clone()).or_insert(0);
        let delay = self.config.delay_for(*requeues);
        *requeues += 1;
        let ready_at = Instant::now() + delay;
        // A key already scheduled sooner (or at the same time) keeps its
        // original deadline; duplicates never cause extra deliveries.
        if state.delayed.get(&key).is_some_and(|at| *at <= ready_at) {
            return;
        }
        debug!(%key, ?delay, "key scheduled");
        state.delayed.insert(key.clone(), ready_at);
        state.waiting.push(Waiting { ready_at, key });
        drop(state);
        // Wake a blocked get() so it can adopt the new deadline.
        self.wake.notify_waiters();
    }

    /// Block until a dirty key is ready, then move it to processing and
    /// return it. Returns `None` once the queue has shut down and all
    /// already-dirty keys have drained.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register for wakeups before inspecting state, otherwise a
            // notify between the unlock and the await is lost.
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                state.promote_due(Instant::now());
                if let Some(key) = state.order.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    // Drained. Keys still in their backoff window are
                    // dropped with the rest of the delay machinery.
                    return None;
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.as_mut().await,
            }
        }
    }

    /// Release a key from processing. If it went dirty again while in
    /// flight, it becomes deliverable now; no update is lost.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.order.push_back(key.clone());
            drop(state);
            self.wake.notify_waiters();
        }
    }

    /// Reset the key's backoff counter. Called on successful processing.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().requeues.remove(key);
    }

    /// Consecutive rate-limited requeues recorded for a key.
    pub fn requeues(&self, key: &ObjectKey) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Number of keys currently deliverable (dirty and not delayed).
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Begin shutdown: wake all blocked getters. Already-dirty keys still
    /// drain through `get`; new work is ignored from here on.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.wake.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
