//! Source-level counters.
//!
//! Handles are cloneable and injected at construction, so tests and
//! embedding applications observe the same counters the source updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct SourceMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    records_fetched: AtomicU64,
    events_decoded: AtomicU64,
    commits: AtomicU64,
    commits_skipped: AtomicU64,
    deferred_commits: AtomicU64,
    store_write_failures: AtomicU64,
    exhaustion_commits: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub records_fetched: u64,
    pub events_decoded: u64,
    pub commits: u64,
    pub commits_skipped: u64,
    pub deferred_commits: u64,
    pub store_write_failures: u64,
    pub exhaustion_commits: u64,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn records_fetched(&self, n: u64) {
        self.inner.records_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn event_decoded(&self) {
        self.inner.events_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit(&self) {
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit_skipped(&self) {
        self.inner.commits_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit_deferred(&self) {
        self.inner.deferred_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn store_write_failure(&self) {
        self.inner.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn exhaustion_commit(&self) {
        self.inner.exhaustion_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_fetched: self.inner.records_fetched.load(Ordering::Relaxed),
            events_decoded: self.inner.events_decoded.load(Ordering::Relaxed),
            commits: self.inner.commits.load(Ordering::Relaxed),
            commits_skipped: self.inner.commits_skipped.load(Ordering::Relaxed),
            deferred_commits: self.inner.deferred_commits.load(Ordering::Relaxed),
            store_write_failures: self.inner.store_write_failures.load(Ordering::Relaxed),
            exhaustion_commits: self.inner.exhaustion_commits.load(Ordering::Relaxed),
        }
    }
}
