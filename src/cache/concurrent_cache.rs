//! Reader/writer cache composing the embedding store, ANN side index and
//! call-graph side index (spec §4.6).
//!
//! Grounded on `codex-rs/retrieval/src/storage/sqlite.rs`'s
//! mutex-poisoning-recovery discipline (the same defensive-recovery
//! posture, applied here to the reader-count drain) and on
//! `codex-rs/retrieval/src/indexing/manager.rs` for the shape of a
//! component owning writer-side lifecycle over several sub-resources.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use fs2::FileExt;
use parking_lot::Mutex as SyncMutex;
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;

use crate::ann::AnnHandle;
use crate::ann::AnnSideIndex;
use crate::cache::metrics::CacheMetrics;
use crate::cache::metrics::CacheMetricsSnapshot;
use crate::callgraph::CallGraphIndex;
use crate::config::AnnConfig;
use crate::config::CacheConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::store::persistence::atomic_write;
use crate::types::Chunk;
use crate::types::FileCallData;
use crate::types::FileMetadata;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The triple a reader sees for the lifetime of one query (spec §4.6
/// "Ordering guarantees").
pub struct Snapshot {
    pub store: Arc<EmbeddingStore>,
    pub ann: AnnHandle,
    pub call_graph: Arc<CallGraphIndex>,
}

/// Holds a reader's slot open for as long as it lives; dropping it
/// decrements the reader count (spec §4.6 `endRead`).
pub struct ReadGuard<'a> {
    cache: &'a ConcurrentCache,
    snapshot: Arc<Snapshot>,
}

impl Deref for ReadGuard<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.cache.reader_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct SaveState {
    in_flight: bool,
    pending: bool,
}

pub struct ConcurrentCache {
    cache_dir: PathBuf,
    config: CacheConfig,
    store: Arc<EmbeddingStore>,
    ann: AsyncMutex<AnnSideIndex>,
    per_file_calls: SyncRwLock<HashMap<String, FileCallData>>,
    call_graph_dirty: AtomicBool,
    built_call_graph: SyncRwLock<Arc<CallGraphIndex>>,
    file_metadata: SyncRwLock<HashMap<String, FileMetadata>>,
    snapshot: SyncRwLock<Arc<Snapshot>>,
    reader_count: AtomicUsize,
    save_state: SyncMutex<SaveState>,
    save_notify: Notify,
    metrics: CacheMetrics,
}

impl ConcurrentCache {
    /// Open the cache for `cache_dir`: loads the call-graph and
    /// file-metadata JSON sidecars if present, and attempts to load a
    /// persisted ANN graph (falling back to dirty/rebuild-on-demand).
    pub async fn open(
        cache_dir: PathBuf,
        config: CacheConfig,
        ann_config: AnnConfig,
        embedding_model: String,
        store: Arc<EmbeddingStore>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&cache_dir).await?;

        let per_file_calls: HashMap<String, FileCallData> =
            load_json(&cache_dir.join("call_graph.json")).await.unwrap_or_default();
        let file_metadata: HashMap<String, FileMetadata> =
            load_json(&cache_dir.join("file_metadata.json")).await.unwrap_or_default();

        let mut ann = AnnSideIndex::new(ann_config, embedding_model);
        let _ = ann.load_or_rebuild(&cache_dir, &store).await;

        let call_graph = Arc::new(CallGraphIndex::build(&per_file_calls));
        let snapshot = Arc::new(Snapshot {
            store: store.clone(),
            ann: ann.handle(),
            call_graph: call_graph.clone(),
        });

        Ok(Self {
            cache_dir,
            config,
            store,
            ann: AsyncMutex::new(ann),
            per_file_calls: SyncRwLock::new(per_file_calls),
            call_graph_dirty: AtomicBool::new(false),
            built_call_graph: SyncRwLock::new(call_graph),
            file_metadata: SyncRwLock::new(file_metadata),
            snapshot: SyncRwLock::new(snapshot),
            reader_count: AtomicUsize::new(0),
            save_state: SyncMutex::new(SaveState::default()),
            save_notify: Notify::new(),
            metrics: CacheMetrics::default(),
        })
    }

    /// Begin a read. The returned guard keeps the reader counted until
    /// dropped (spec §4.6 `startRead`/`endRead`).
    pub fn read(&self) -> ReadGuard<'_> {
        self.reader_count.fetch_add(1, Ordering::AcqRel);
        let snapshot = self.snapshot.read().clone();
        ReadGuard { cache: self, snapshot }
    }

    pub fn file_metadata(&self, file: &str) -> Option<FileMetadata> {
        self.file_metadata.read().get(file).cloned()
    }

    pub fn set_file_metadata(&self, file: String, meta: FileMetadata) {
        self.file_metadata.write().insert(file, meta);
    }

    pub fn remove_file_metadata(&self, file: &str) {
        self.file_metadata.write().remove(file);
    }

    pub fn file_metadata_snapshot(&self) -> HashMap<String, FileMetadata> {
        self.file_metadata.read().clone()
    }

    pub fn set_file_call_data(&self, file: String, data: FileCallData) {
        self.per_file_calls.write().insert(file, data);
        self.call_graph_dirty.store(true, Ordering::Release);
    }

    pub fn remove_file_call_data(&self, file: &str) {
        self.per_file_calls.write().remove(file);
        self.call_graph_dirty.store(true, Ordering::Release);
    }

    /// Append chunks to the store and mark the ANN index dirty, then
    /// republish (spec §4.6 "individual chunk-level mutations ... use
    /// short critical sections that do not block readers").
    pub async fn append_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.store.append_chunks(chunks).await?;
        self.ann.lock().await.mark_dirty();
        self.publish().await;
        Ok(())
    }

    /// Remove a file's chunks. This renumbers store indices, so it waits
    /// for active readers to drain before compacting (spec §4.6).
    pub async fn remove_file_chunks(&self, file: &str) -> Result<usize> {
        self.drain_readers(self.config.reader_drain_timeout).await?;
        let removed = self.store.remove_file_chunks(file).await?;
        if removed > 0 {
            self.remove_file_call_data(file);
            self.ann.lock().await.mark_dirty();
            self.publish().await;
        }
        Ok(removed)
    }

    /// Rebuild the ANN graph if dirty and large enough, then republish.
    /// Returns whether a usable graph is available afterward.
    pub async fn ensure_ann_built(&self) -> bool {
        let mut ann = self.ann.lock().await;
        let was_dirty = ann.is_dirty();
        let built = ann.ensure_built(&self.store).await;
        if was_dirty && !ann.is_dirty() {
            self.metrics.record_rebuild();
        }
        drop(ann);
        self.publish().await;
        built
    }

    /// Force a rebuild regardless of the current dirty flag (the tool
    /// API's explicit `ann_config({action: "rebuild"})`, spec §6).
    pub async fn force_rebuild_ann(&self) -> bool {
        {
            let mut ann = self.ann.lock().await;
            ann.mark_dirty();
        }
        self.ensure_ann_built().await
    }

    /// Takes effect immediately for every existing reader's handle (spec
    /// §4.4 `setEfSearch`) — no republish needed.
    pub async fn set_ef_search(&self, value: usize) {
        self.ann.lock().await.set_ef_search(value);
    }

    pub fn ann_stats(&self) -> Option<crate::ann::hnsw_index::AnnStats> {
        self.snapshot.read().ann.stats()
    }

    /// One query has reached the scoring stage (spec §4.7); counted for
    /// `ann_config({action: "stats"})`'s observability surface.
    pub fn record_query(&self) {
        self.metrics.record_query();
    }

    /// The searcher's ANN candidate pool under-represented the request and
    /// fell back to a linear scan (spec §4.4/§4.7 "Fallback semantics").
    pub fn record_ann_fallback(&self) {
        self.metrics.record_ann_fallback();
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Persist the ANN graph, call-graph blob, and file-metadata map,
    /// serialized via the advisory workspace lock and coalesced so
    /// concurrent callers share one underlying write (spec §4.6
    /// "single-flight save queue").
    pub async fn save(&self, throw_on_error: bool) -> Result<()> {
        let became_runner = {
            let mut state = self.save_state.lock();
            if state.in_flight {
                state.pending = true;
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if !became_runner {
            loop {
                self.save_notify.notified().await;
                if !self.save_state.lock().in_flight {
                    return Ok(());
                }
            }
        }

        loop {
            let result = self.do_save().await;
            let rerun = {
                let mut state = self.save_state.lock();
                if state.pending {
                    state.pending = false;
                    true
                } else {
                    state.in_flight = false;
                    false
                }
            };
            self.save_notify.notify_waiters();

            if rerun {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cache save failed, retrying for a coalesced request");
                }
                continue;
            }

            return match result {
                Ok(()) => Ok(()),
                Err(e) if throw_on_error => Err(e),
                Err(e) => {
                    self.metrics.record_background_save_failure();
                    tracing::warn!(error = %e, "background cache save failed; state kept in memory");
                    Ok(())
                }
            };
        }
    }

    async fn do_save(&self) -> Result<()> {
        let _lock = self.acquire_workspace_lock().await?;
        self.ann.lock().await.persist(&self.cache_dir, &self.store).await?;
        self.persist_call_graph().await?;
        self.persist_file_metadata().await?;
        Ok(())
    }

    async fn persist_call_graph(&self) -> Result<()> {
        let map = self.per_file_calls.read().clone();
        let bytes = serde_json::to_vec_pretty(&map).map_err(|e| EngineError::Corrupt {
            detail: format!("encoding call graph: {e}"),
        })?;
        atomic_write(&self.cache_dir.join("call_graph.json"), &bytes).await
    }

    async fn persist_file_metadata(&self) -> Result<()> {
        let map = self.file_metadata.read().clone();
        let bytes = serde_json::to_vec_pretty(&map).map_err(|e| EngineError::Corrupt {
            detail: format!("encoding file metadata: {e}"),
        })?;
        atomic_write(&self.cache_dir.join("file_metadata.json"), &bytes).await
    }

    async fn acquire_workspace_lock(&self) -> Result<std::fs::File> {
        let lock_path = self.cache_dir.join("workspace.lock");
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().create(true).write(true).open(&lock_path)?;
            file.lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| EngineError::WorkspaceLock { cause: e.to_string() })?
        .map_err(|e| EngineError::WorkspaceLock { cause: e.to_string() })
    }

    /// Republish the snapshot with the current store, the latest ANN
    /// handle, and the call graph (rebuilt lazily if dirty). Visible
    /// within the crate so callers that batch several `set_file_call_data`
    /// mutations (the indexer, or tests) can force one republish instead
    /// of waiting for the next `append_chunks`/`remove_file_chunks`.
    pub(crate) async fn publish(&self) {
        let ann_handle = self.ann.lock().await.handle();
        let call_graph = self.call_graph_index();
        let snapshot = Arc::new(Snapshot {
            store: self.store.clone(),
            ann: ann_handle,
            call_graph,
        });
        *self.snapshot.write() = snapshot;
    }

    fn call_graph_index(&self) -> Arc<CallGraphIndex> {
        if self.call_graph_dirty.swap(false, Ordering::AcqRel) {
            let map = self.per_file_calls.read().clone();
            let built = Arc::new(CallGraphIndex::build(&map));
            *self.built_call_graph.write() = built.clone();
            built
        } else {
            self.built_call_graph.read().clone()
        }
    }

    /// Wait for the reader count to reach zero, bounded by `timeout`
    /// (spec §4.6 "waits for active readers to drain up to a bounded
    /// timeout").
    async fn drain_readers(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.reader_count.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::ReaderDrainTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn cache_with_config(cache_config: CacheConfig) -> (ConcurrentCache, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(EmbeddingStore::open(&dir.path().join("store.db")).await.expect("open store"));
        let cache = ConcurrentCache::open(
            dir.path().join("cache"),
            cache_config,
            AnnConfig::default(),
            "test-model".to_string(),
            store,
        )
        .await
        .expect("open cache");
        (cache, dir)
    }

    #[tokio::test]
    async fn read_guard_increments_and_decrements_reader_count() {
        let (cache, _dir) = cache_with_config(CacheConfig::default()).await;
        assert_eq!(cache.reader_count.load(Ordering::Acquire), 0);
        {
            let _guard = cache.read();
            assert_eq!(cache.reader_count.load(Ordering::Acquire), 1);
        }
        assert_eq!(cache.reader_count.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn remove_file_chunks_times_out_while_a_reader_is_active() {
        let cache_config = CacheConfig {
            reader_drain_timeout: Duration::from_millis(30),
            ..Default::default()
        };
        let (cache, _dir) = cache_with_config(cache_config).await;
        let _guard = cache.read();
        let result = cache.remove_file_chunks("nonexistent.rs").await;
        assert!(matches!(result, Err(EngineError::ReaderDrainTimeout { .. })));
    }

    #[tokio::test]
    async fn remove_file_chunks_succeeds_once_readers_have_drained() {
        let (cache, _dir) = cache_with_config(CacheConfig::default()).await;
        let removed = cache.remove_file_chunks("nonexistent.rs").await.expect("remove");
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn append_chunks_marks_ann_dirty_and_republishes() {
        let (cache, _dir) = cache_with_config(CacheConfig::default()).await;
        cache
            .append_chunks(vec![Chunk {
                file: "a.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn a() {}".to_string(),
                vector: vec![1.0, 0.0],
                token_count: Some(4),
            }])
            .await
            .expect("append");

        let guard = cache.read();
        assert_eq!(guard.store.length().await.expect("length"), 1);
    }

    #[tokio::test]
    async fn set_file_call_data_marks_call_graph_dirty_for_next_publish() {
        let (cache, _dir) = cache_with_config(CacheConfig::default()).await;
        let mut data = FileCallData::default();
        data.definitions.insert("handle_request".to_string());
        cache.set_file_call_data("a.rs".to_string(), data);
        assert!(cache.call_graph_dirty.load(Ordering::Acquire));

        cache.publish().await;
        let related = cache.read().call_graph.related(&["handle_request".to_string()], 1);
        assert_eq!(related.get("a.rs"), Some(&1.0));
    }

    #[tokio::test]
    async fn ensure_ann_built_counts_exactly_one_rebuild() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(EmbeddingStore::open(&dir.path().join("store.db")).await.expect("open store"));
        let cache = ConcurrentCache::open(
            dir.path().join("cache"),
            CacheConfig::default(),
            AnnConfig {
                ann_min_chunks: 1,
                ..Default::default()
            },
            "test-model".to_string(),
            store,
        )
        .await
        .expect("open cache");

        cache
            .append_chunks(vec![Chunk {
                file: "a.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn a() {}".to_string(),
                vector: vec![1.0, 0.0],
                token_count: Some(4),
            }])
            .await
            .expect("append");

        assert!(cache.ensure_ann_built().await);
        assert_eq!(cache.metrics().rebuilds, 1);
        // Not dirty anymore, so a second call should not count another rebuild.
        assert!(cache.ensure_ann_built().await);
        assert_eq!(cache.metrics().rebuilds, 1);
    }

    #[tokio::test]
    async fn save_persists_file_metadata_and_is_safe_to_call_concurrently() {
        let (cache, _dir) = cache_with_config(CacheConfig::default()).await;
        cache.set_file_metadata(
            "a.rs".to_string(),
            FileMetadata {
                mtime_ms: 1000,
                hash: "abc".to_string(),
                size: 10,
            },
        );

        let (a, b) = tokio::join!(cache.save(true), cache.save(true));
        a.expect("save a");
        b.expect("save b");

        let path = cache.cache_dir.join("file_metadata.json");
        assert!(path.exists());
    }
}
