//! ANN side index: lifecycle (dirty/rebuild/cooldown/retry) around the
//! HNSW graph itself (spec §4.4).

pub mod hnsw_index;
pub mod persistence;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AnnConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::types::AnnMetadata;
use crate::types::CURRENT_VERSION;
use hnsw_index::AnnStats;
use hnsw_index::HnswIndex;

/// A cheap, `Clone`-able, read-only view of whatever graph was built as of
/// the last snapshot publish (spec §4.6 "readers hold logical immutability
/// of ... `annIndex` ... for the duration"). Readers never touch
/// [`AnnSideIndex`] directly — only the writer does.
#[derive(Clone, Default)]
pub struct AnnHandle {
    graph: Option<Arc<HnswIndex>>,
}

impl AnnHandle {
    pub fn query(&self, vector: &[f32], k: usize) -> Option<Vec<usize>> {
        self.graph.as_ref().map(|g| g.query(vector, k))
    }

    pub fn stats(&self) -> Option<AnnStats> {
        self.graph.as_ref().map(|g| g.stats())
    }

    pub fn is_built(&self) -> bool {
        self.graph.is_some()
    }
}

/// Candidate count the searcher should request from the graph for a
/// `max_results` query (spec §4.4 "Candidate sizing").
pub fn candidate_count(max_results: usize, total_chunks: usize, config: &AnnConfig) -> usize {
    let scaled = ((max_results as f64) * config.candidate_multiplier).ceil() as usize;
    let desired = max_results.max(scaled);
    let upper = total_chunks.min(config.max_candidates);
    desired.clamp(config.min_candidates, upper.max(config.min_candidates))
}

/// Owns the built graph (if any) plus its dirty/rebuild/cooldown state.
pub struct AnnSideIndex {
    config: AnnConfig,
    embedding_model: String,
    graph: Option<Arc<HnswIndex>>,
    dirty: bool,
    rebuild_attempts: u32,
    cooldown_until: Option<Instant>,
}

impl AnnSideIndex {
    pub fn new(config: AnnConfig, embedding_model: String) -> Self {
        Self {
            config,
            embedding_model,
            graph: None,
            dirty: true,
            rebuild_attempts: 0,
            cooldown_until: None,
        }
    }

    /// Mark the index dirty (chunk added/removed, model changed, metadata
    /// mismatch, or a previous load/add failure — spec §4.4 "Lifecycle").
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn stats(&self) -> Option<AnnStats> {
        self.graph.as_ref().map(|g| g.stats())
    }

    /// A cheap, shareable snapshot of whatever graph is currently built —
    /// the writer publishes this into the cache's `Snapshot` for readers.
    pub fn handle(&self) -> AnnHandle {
        AnnHandle {
            graph: self.graph.clone(),
        }
    }

    pub fn set_ef_search(&mut self, value: usize) {
        self.config.ef_search = value;
        if let Some(graph) = &self.graph {
            graph.set_ef_search(value);
        }
    }

    /// Rebuild from `store` if dirty and large enough, honoring the
    /// rebuild-retry/cooldown protocol. Returns `true` if a usable graph is
    /// available after this call.
    pub async fn ensure_built(&mut self, store: &EmbeddingStore) -> bool {
        if !self.dirty {
            return self.graph.is_some();
        }
        let count = match store.length().await {
            Ok(n) => n,
            Err(_) => return false,
        };
        if count < self.config.ann_min_chunks {
            return false;
        }
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return false;
            }
        }

        match self.rebuild(store).await {
            Ok(()) => {
                self.dirty = false;
                self.rebuild_attempts = 0;
                self.cooldown_until = None;
                true
            }
            Err(_) => {
                self.rebuild_attempts += 1;
                if self.rebuild_attempts >= self.config.rebuild_retries {
                    self.graph = None;
                    self.cooldown_until = Some(Instant::now() + self.config.cooldown);
                }
                false
            }
        }
    }

    async fn rebuild(&mut self, store: &EmbeddingStore) -> Result<()> {
        let records = store.iterate(false, true).await?;
        if records.is_empty() {
            return Err(EngineError::AnnUnavailable {
                cause: "no chunks to index".to_string(),
            });
        }
        let dim = records[0].vector.len();
        let vectors: Vec<(usize, Vec<f32>)> = records.into_iter().map(|r| (r.index, r.vector)).collect();

        // Retry with a progressively smaller capacity hint doesn't change
        // `hnsw_rs`'s API surface we use, but we still bound attempts here
        // so a pathological build can't loop forever within one call.
        let index = HnswIndex::build(
            &vectors,
            self.config.metric,
            self.config.m,
            self.config.ef_construction,
            self.config.ef_search,
            dim,
        )?;

        self.graph = Some(Arc::new(index));
        Ok(())
    }

    /// Persist the current graph's source vectors + metadata, if built.
    pub async fn persist(&self, workspace_cache_dir: &Path, store: &EmbeddingStore) -> Result<()> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };
        let stats = graph.stats();
        let records = store.iterate(false, true).await?;
        let vectors: Vec<(usize, Vec<f32>)> = records.into_iter().map(|r| (r.index, r.vector)).collect();
        let metadata = AnnMetadata {
            version: CURRENT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dim: stats.dim,
            count: stats.count,
            metric: stats.metric,
            m: stats.m,
            ef_construction: stats.ef_construction,
        };
        persistence::save(workspace_cache_dir, &vectors, &metadata).await
    }

    /// Load a persisted graph, rebuilding from `store` instead if the
    /// sidecar metadata disagrees with the live store (spec §4.4 "On
    /// read").
    pub async fn load_or_rebuild(&mut self, workspace_cache_dir: &Path, store: &EmbeddingStore) -> Result<()> {
        let current_count = store.length().await?;
        let Some((vectors, loaded_meta)) = persistence::load(workspace_cache_dir).await? else {
            self.dirty = true;
            return Ok(());
        };

        let current_meta = AnnMetadata {
            version: CURRENT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dim: loaded_meta.dim,
            count: current_count,
            metric: self.config.metric,
            m: self.config.m,
            ef_construction: self.config.ef_construction,
        };

        if !persistence::metadata_matches(&loaded_meta, &current_meta) {
            self.dirty = true;
            return Ok(());
        }

        let dim = loaded_meta.dim;
        let index = HnswIndex::build(
            &vectors,
            self.config.metric,
            self.config.m,
            self.config.ef_construction,
            self.config.ef_search,
            dim,
        )?;
        self.graph = Some(Arc::new(index));
        self.dirty = false;
        Ok(())
    }

    /// Query the graph. Returns `None` if no graph is currently built —
    /// the caller falls back to linear scan (spec §4.4 "Fallback
    /// semantics").
    pub fn query(&self, vector: &[f32], k: usize) -> Option<Vec<usize>> {
        self.graph.as_ref().map(|g| g.query(vector, k))
    }
}
