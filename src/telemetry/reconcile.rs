//! Reconcile span helpers.
//!
//! One span per dequeue, wrapping the callback invocation and the
//! requeue-or-forget decision.

use tracing::Span;

use crate::key::ObjectKey;

/// Start a span for one reconcile attempt.
pub fn start_reconcile_span(key: &ObjectKey, worker: usize) -> Span {
    tracing::info_span!(
        "reconcile",
        "reconcile.key" = %key,
        "reconcile.worker" = worker,
        "reconcile.outcome" = tracing::field::Empty,
    )
}

/// Record the attempt's outcome on the current span.
pub fn record_outcome(outcome: &str) {
    Span::current().record("reconcile.outcome", outcome);
    tracing::info!(outcome, "reconcile finished");
}
