//! In-process counter/gauge registry. Outway owns and increments these
//! counters; serving them over HTTP for an external Prometheus scrape is
//! somebody else's job.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn set(&self, v: i64) {
        self.0.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-source query counters plus the handful of cross-cutting gauges and
/// failure counters an external collector would scrape.
#[derive(Default)]
pub struct Metrics {
    pub queries_total: Counter,
    pub queries_hosts: Counter,
    pub queries_lan: Counter,
    pub queries_cache: Counter,
    pub queries_upstream: Counter,
    pub queries_errored: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub coalesced_waiters: Counter,
    pub upstream_attempts: Counter,
    pub upstream_failures: Counter,
    pub mark_failures: Counter,
    pub marks_installed: Counter,
    pub inflight_queries: Gauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn global() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}
