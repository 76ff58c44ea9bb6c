//! The concurrent cache (spec §4.6): owns the embedding store, ANN side
//! index, and call-graph side index behind a reader/writer discipline.

pub mod concurrent_cache;
pub mod metrics;

pub use concurrent_cache::ConcurrentCache;
pub use concurrent_cache::ReadGuard;
pub use concurrent_cache::Snapshot;
pub use metrics::CacheMetricsSnapshot;
