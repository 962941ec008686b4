//! Shared health state for the /health endpoint.
//! Updated by the dashboard on every report request.

use std::sync::atomic::{AtomicU64, Ordering};

/// Refresh counters. Written by `Dashboard`, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Nanosecond timestamp of the last successful warehouse round trip (0 = none).
    pub last_refresh_at_ns: AtomicU64,
    /// Warehouse round trips that failed.
    pub warehouse_errors: AtomicU64,
    /// Report requests served from the memo.
    pub cache_hits: AtomicU64,
    /// Report requests that went to the warehouse.
    pub cache_misses: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_refresh_at_ns(&self, ns: u64) {
        self.last_refresh_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn inc_warehouse_errors(&self) {
        self.warehouse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_refresh_at_ns(&self) -> u64 {
        self.last_refresh_at_ns.load(Ordering::Relaxed)
    }

    pub fn warehouse_errors(&self) -> u64 {
        self.warehouse_errors.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }
}
