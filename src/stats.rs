//! Request and delivery counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StubStats {
    /// Requests offered to the engine for claiming.
    requests_total: AtomicU64,
    /// Requests claimed and scheduled for delivery.
    requests_claimed: AtomicU64,
    requests_unmatched: AtomicU64,
    /// Requests without a usable URL string.
    requests_unresolvable: AtomicU64,
    deliveries_completed: AtomicU64,
    deliveries_failed: AtomicU64,
    deliveries_cancelled: AtomicU64,
}

/// Point-in-time copy of [`StubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub requests_claimed: u64,
    pub requests_unmatched: u64,
    pub requests_unresolvable: u64,
    pub deliveries_completed: u64,
    pub deliveries_failed: u64,
    pub deliveries_cancelled: u64,
}

impl StubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_claimed(&self) {
        self.requests_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self) {
        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unresolvable(&self) {
        self.requests_unresolvable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.deliveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.deliveries_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_claimed: self.requests_claimed.load(Ordering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(Ordering::Relaxed),
            requests_unresolvable: self.requests_unresolvable.load(Ordering::Relaxed),
            deliveries_completed: self.deliveries_completed.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            deliveries_cancelled: self.deliveries_cancelled.load(Ordering::Relaxed),
        }
    }
}
