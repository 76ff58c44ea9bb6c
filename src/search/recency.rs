//! Bounded LRU of `file -> mtimeMs`, backing the recency boost (spec
//! §4.7 step 5, §5 "file-mod-time LRU").
//!
//! Grounded on `codex-retrieval`'s pervasive `tokio`-fan-out-with-bounded-
//! concurrency style (e.g. `indexing/manager.rs`); the LRU itself uses the
//! teacher's exact `lru` dependency.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Target/max sizes and stat fan-out are config-driven (spec §4.7 step 5);
/// defaults live in `HybridSearchConfig`.
pub struct RecencyCache {
    inner: Mutex<LruCache<String, i64>>,
    target: usize,
}

impl RecencyCache {
    pub fn new(target: usize, max: usize) -> Self {
        let cap = NonZeroUsize::new(max.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            target: target.max(1),
        }
    }

    pub fn get(&self, file: &str) -> Option<i64> {
        self.inner.lock().get(file).copied()
    }

    pub fn insert(&self, file: String, mtime_ms: i64) {
        self.inner.lock().put(file, mtime_ms);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Soft occupancy target below which it's still worth statting more
    /// files; tracked for parity with the target/max split spec §4.7 names,
    /// rather than enforced here as a hard gate.
    pub fn target(&self) -> usize {
        self.target
    }
}

/// Best-effort `stat` fan-out for files missing from `cached`, bounded to
/// `fanout` concurrent calls (spec §4.7 step 5 "for small candidate sets
/// ... best-effort stat missing entries with bounded concurrency").
pub async fn stat_missing(files: &[String], cached: &RecencyCache, fanout: usize) -> HashMap<String, i64> {
    let semaphore = Arc::new(Semaphore::new(fanout.max(1)));
    let mut handles = Vec::with_capacity(files.len());

    for file in files {
        if cached.get(file).is_some() {
            continue;
        }
        let file = file.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.ok()?;
            let meta = tokio::fs::metadata(&file).await.ok()?;
            let mtime_ms = meta.modified().ok().and_then(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_millis() as i64)
            })?;
            Some((file, mtime_ms))
        }));
    }

    let mut out = HashMap::new();
    for handle in handles {
        if let Ok(Some((file, mtime_ms))) = handle.await {
            cached.insert(file.clone(), mtime_ms);
            out.insert(file, mtime_ms);
        }
    }
    out
}

/// Linear recency decay (spec §4.7 "recencyBoost, recencyDecayDays"):
/// `max(0, 1 - ageMs / decayMs) * recencyBoost`.
pub fn recency_score(mtime_ms: i64, now_ms: i64, decay_days: f32, recency_boost: f32) -> f32 {
    let decay_ms = (decay_days as f64 * 86_400_000.0).max(1.0);
    let age_ms = (now_ms - mtime_ms).max(0) as f64;
    let factor = (1.0 - age_ms / decay_ms).max(0.0);
    (factor as f32) * recency_boost
}
