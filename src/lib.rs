//! # relevel
//!
//! A level-triggered reconciliation engine: watch a collection of mutable
//! records, coalesce change notifications into a deduplicating,
//! rate-limited work queue, and drive a worker pool that repeatedly tries
//! to converge the world on each record's desired state.
//!
//! Supply a [`watch::WatchSource`] and a [`controller::Reconcile`]
//! implementation; the [`controller::Controller`] does the rest.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod key;
pub mod queue;
pub mod record;
pub mod reflector;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod watch;
