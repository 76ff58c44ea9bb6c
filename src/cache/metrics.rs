//! Lightweight operational counters surfaced through the cache for the
//! tool API's `ann_config({action: "stats"})` response. Ambient
//! observability, not a feature any non-goal scopes out.
//!
//! Grounded on `codex-retrieval::metrics`'s pattern of a small struct
//! computed from primitive counters, adapted here to atomics updated
//! from concurrent readers/writers instead of a single-pass computation
//! over one file's content.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Default)]
pub struct CacheMetrics {
    queries_served: AtomicU64,
    ann_fallbacks: AtomicU64,
    rebuilds: AtomicU64,
    background_save_failures: AtomicU64,
}

/// A point-in-time copy of [`CacheMetrics`]'s counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub queries_served: u64,
    pub ann_fallbacks: u64,
    pub rebuilds: u64,
    pub background_save_failures: u64,
}

impl CacheMetrics {
    pub fn record_query(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ann_fallback(&self) {
        self.ann_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_save_failure(&self) {
        self.background_save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            queries_served: self.queries_served.load(Ordering::Relaxed),
            ann_fallbacks: self.ann_fallbacks.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            background_save_failures: self.background_save_failures.load(Ordering::Relaxed),
        }
    }
}
