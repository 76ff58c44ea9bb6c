//! Hybrid search: orchestrates query embedding, candidate selection (ANN
//! or linear scan), multi-signal scoring, and top-k assembly (spec §4.7).
//!
//! Grounded on `codex-rs/retrieval/src/search/hybrid.rs` for overall shape
//! (a searcher struct holding `Arc`s to its dependencies, an async
//! `search()` entry point, `tracing::warn!` on degraded branches); the
//! scoring formula itself is original to this crate since
//! `codex-rs/retrieval` fuses independent BM25/vector/snippet result lists
//! via RRF, a different algorithm than this additive semantic + boost
//! model.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::ann::candidate_count;
use crate::cache::ConcurrentCache;
use crate::callgraph::extract_symbols;
use crate::config::AnnConfig;
use crate::config::CallGraphConfig;
use crate::config::HybridSearchConfig;
use crate::embeddings::truncate_and_renormalize;
use crate::embeddings::EmbeddingProvider;
use crate::error::EngineError;
use crate::error::Result;
use crate::search::recency::recency_score;
use crate::search::recency::stat_missing;
use crate::search::recency::RecencyCache;
use crate::types::SearchHit;
use crate::types::SearchOutcome;

/// Top-5-chunks cap used when pulling symbols for the call-graph proximity
/// lift (spec §4.7 step 7).
const CALL_GRAPH_SYMBOL_CHUNKS: usize = 5;
/// Per-chunk symbol cap fed into `related()` — kept small since only a
/// handful of seeds are needed to find neighboring files.
const CALL_GRAPH_SYMBOLS_PER_CHUNK: usize = 8;

struct Scored {
    file: String,
    start_line: u32,
    end_line: u32,
    score: f32,
    content: String,
}

/// Orchestrates one `search()` call end to end against a [`ConcurrentCache`]
/// snapshot. Stateless across calls except for the recency LRU, which is
/// intentionally shared to avoid re-statting the same files every query.
pub struct HybridSearcher {
    cache: Arc<ConcurrentCache>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: HybridSearchConfig,
    ann_config: AnnConfig,
    call_graph_config: CallGraphConfig,
    recency: RecencyCache,
}

impl HybridSearcher {
    pub fn new(
        cache: Arc<ConcurrentCache>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: HybridSearchConfig,
        ann_config: AnnConfig,
        call_graph_config: CallGraphConfig,
    ) -> Self {
        let recency = RecencyCache::new(config.recency_lru_target, config.recency_lru_max);
        Self {
            cache,
            embeddings,
            config,
            ann_config,
            call_graph_config,
            recency,
        }
    }

    /// Run one hybrid search (spec §4.7 "Procedure").
    pub async fn search(&self, query: &str, max_results: usize) -> Result<SearchOutcome> {
        if query.is_empty() {
            return Err(EngineError::InvalidQuery {
                reason: "query must not be empty".to_string(),
            });
        }
        if max_results == 0 {
            return Ok(SearchOutcome {
                results: Vec::new(),
                message: None,
            });
        }

        // ANN is rebuilt lazily on demand (spec §4.4 "On the next query
        // while dirty ... the index is rebuilt") before we take the
        // snapshot we'll actually query against.
        if self.config.ann_enabled {
            self.cache.ensure_ann_built().await;
        }

        self.cache.record_query();

        let guard = self.cache.read();
        let total_chunks = guard.store.length().await?;
        if total_chunks == 0 {
            return Ok(SearchOutcome {
                results: Vec::new(),
                message: Some("No code has been indexed yet. Please wait for initial indexing to complete.".to_string()),
            });
        }

        let raw_vector = self.embeddings.embed(query).await?;
        let query_vector = truncate_and_renormalize(&raw_vector, self.config.embedding_dimension);
        let dim = query_vector.len();

        let (candidates, used_ann) = self.select_candidates(&guard, &query_vector, max_results, total_chunks);

        let trimmed_query = query.trim();
        let query_lower = trimmed_query.to_lowercase();
        let non_trivial_query = trimmed_query.chars().count() > 1;

        let mut candidates = candidates;
        if used_ann && non_trivial_query {
            self.augment_with_keyword_matches(&guard, &mut candidates, &query_lower, max_results, total_chunks)
                .await;
        }

        let apply_text_now = non_trivial_query && candidates.len() <= self.config.text_match_max_candidates;

        let mut scored = self
            .score_candidates(&guard, &candidates, &query_vector, dim, &query_lower, trimmed_query, apply_text_now)
            .await;

        if self.config.recency_boost > 0.0 {
            self.apply_recency(&mut scored).await;
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        if non_trivial_query && !apply_text_now {
            self.apply_deferred_text_boost(&mut scored, &query_lower, trimmed_query);
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        if self.config.call_graph_enabled && self.config.call_graph_boost > 0.0 {
            self.apply_call_graph_boost(&guard, &mut scored).await;
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        scored.truncate(max_results);

        let results = scored
            .into_iter()
            .map(|s| SearchHit {
                file: s.file,
                start_line: s.start_line,
                end_line: s.end_line,
                score: s.score,
                content: s.content,
            })
            .collect();

        Ok(SearchOutcome { results, message: None })
    }

    /// Spec §4.7 step 3: ANN candidates if available and sufficient,
    /// otherwise a full linear scan. Returns `(candidates, used_ann)`.
    fn select_candidates(
        &self,
        guard: &crate::cache::ReadGuard<'_>,
        query_vector: &[f32],
        max_results: usize,
        total_chunks: usize,
    ) -> (Vec<usize>, bool) {
        if !self.config.ann_enabled {
            return ((0..total_chunks).collect(), false);
        }

        let k = candidate_count(max_results, total_chunks, &self.ann_config);
        match guard.ann.query(query_vector, k) {
            Some(indices) if indices.len() >= max_results => {
                // Index-based dedup (spec §9 open question, resolved in
                // DESIGN.md): indices are dense and unambiguous.
                let deduped: Vec<usize> = indices.into_iter().collect::<HashSet<_>>().into_iter().collect();
                (deduped, true)
            }
            Some(_) => {
                tracing::warn!("ANN returned fewer candidates than requested, falling back to full scan");
                self.cache.record_ann_fallback();
                ((0..total_chunks).collect(), false)
            }
            None => {
                self.cache.record_ann_fallback();
                ((0..total_chunks).collect(), false)
            }
        }
    }

    /// Spec §4.7 step 4: when an ANN candidate pool under-represents
    /// substring matches, widen it by scanning the rest of the store in
    /// batches, yielding between batches.
    async fn augment_with_keyword_matches(
        &self,
        guard: &crate::cache::ReadGuard<'_>,
        candidates: &mut Vec<usize>,
        query_lower: &str,
        max_results: usize,
        total_chunks: usize,
    ) {
        let mut present: HashSet<usize> = candidates.iter().copied().collect();

        let mut matched = 0usize;
        for &idx in candidates.iter() {
            if let Ok(Some(content)) = guard.store.get_content(idx).await {
                if content.to_lowercase().contains(query_lower) {
                    matched += 1;
                }
            }
        }

        if matched >= max_results {
            return;
        }
        if total_chunks > self.config.full_scan_threshold {
            tracing::debug!(total_chunks, "skipping keyword augmentation: store too large for a full scan");
            return;
        }

        let all: Vec<usize> = (0..total_chunks).collect();
        for batch in all.chunks(self.config.keyword_augmentation_batch_size) {
            for &idx in batch {
                if present.contains(&idx) {
                    continue;
                }
                if let Ok(Some(content)) = guard.store.get_content(idx).await {
                    if content.to_lowercase().contains(query_lower) {
                        candidates.push(idx);
                        present.insert(idx);
                        matched += 1;
                        if matched >= max_results {
                            return;
                        }
                    }
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Spec §4.7 step 6: batched scoring with cooperative yields between
    /// batches. Dimension-mismatched/missing vectors are skipped, not
    /// fatal (spec §7).
    async fn score_candidates(
        &self,
        guard: &crate::cache::ReadGuard<'_>,
        candidates: &[usize],
        query_vector: &[f32],
        dim: usize,
        query_lower: &str,
        trimmed_query: &str,
        apply_text_now: bool,
    ) -> Vec<Scored> {
        let mut out = Vec::with_capacity(candidates.len());

        for batch in candidates.chunks(self.config.scoring_batch_size) {
            for &idx in batch {
                let record = match guard.store.get_record(idx).await {
                    Ok(Some(r)) => r,
                    _ => continue,
                };
                if record.vector.len() != dim {
                    tracing::debug!(index = idx, expected = dim, actual = record.vector.len(), "skipping chunk with mismatched vector dimension");
                    continue;
                }

                let dot: f32 = query_vector.iter().zip(record.vector.iter()).map(|(a, b)| a * b).sum();
                let mut score = dot * self.config.semantic_weight;

                if apply_text_now {
                    score += self.text_match_boost(&record.content, query_lower, trimmed_query);
                }

                out.push(Scored {
                    file: record.file,
                    start_line: record.start_line,
                    end_line: record.end_line,
                    score,
                    content: record.content,
                });
            }
            tokio::task::yield_now().await;
        }

        out
    }

    /// Exact-substring boost, else a partial-word-overlap boost (spec
    /// §4.7 "exactMatchBoost", "Partial-match factor").
    fn text_match_boost(&self, content: &str, query_lower: &str, trimmed_query: &str) -> f32 {
        let content_lower = content.to_lowercase();
        if content_lower.contains(query_lower) {
            return self.config.exact_match_boost;
        }

        let eligible_words: Vec<String> = trimmed_query
            .split_whitespace()
            .filter(|w| w.chars().count() > 2)
            .map(|w| w.to_lowercase())
            .collect();
        if eligible_words.is_empty() {
            return 0.0;
        }
        let matched = eligible_words.iter().filter(|w| content_lower.contains(w.as_str())).count();
        (matched as f32 / eligible_words.len() as f32) * self.config.partial_match_factor
    }

    /// Spec §4.7 step 6 "Else defer text matching": applied only to the
    /// top `textMatchMaxCandidates` chunks once the vector-only order is
    /// known.
    fn apply_deferred_text_boost(&self, scored: &mut [Scored], query_lower: &str, trimmed_query: &str) {
        let limit = self.config.text_match_max_candidates.min(scored.len());
        for item in &mut scored[..limit] {
            item.score += self.text_match_boost(&item.content, query_lower, trimmed_query);
        }
    }

    /// Spec §4.7 step 5: populate the recency LRU (cache-backed first,
    /// best-effort `stat` fan-out for small candidate sets) and fold the
    /// linear-decay boost into each scored chunk.
    async fn apply_recency(&self, scored: &mut [Scored]) {
        let now_ms = now_millis();
        let distinct_files: Vec<String> = scored
            .iter()
            .map(|s| s.file.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for file in &distinct_files {
            if self.recency.get(file).is_some() {
                continue;
            }
            if let Some(meta) = self.cache.file_metadata(file) {
                self.recency.insert(file.clone(), meta.mtime_ms);
            }
        }

        if distinct_files.len() <= self.config.recency_stat_threshold_files {
            let still_missing: Vec<String> = distinct_files
                .iter()
                .filter(|f| self.recency.get(f).is_none())
                .cloned()
                .collect();
            if !still_missing.is_empty() {
                stat_missing(&still_missing, &self.recency, self.config.recency_stat_fanout).await;
            }
        }

        for item in scored.iter_mut() {
            if let Some(mtime_ms) = self.recency.get(&item.file) {
                item.score += recency_score(mtime_ms, now_ms, self.config.recency_decay_days, self.config.recency_boost);
            }
        }
    }

    /// Spec §4.7 step 7: symbols from the top-5 scored chunks feed the
    /// call-graph side index's bounded-hop related-files query; matching
    /// files get an additive `proximity * callGraphBoost` lift.
    async fn apply_call_graph_boost(&self, guard: &crate::cache::ReadGuard<'_>, scored: &mut [Scored]) {
        let top = &scored[..CALL_GRAPH_SYMBOL_CHUNKS.min(scored.len())];
        let mut symbols: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for item in top {
            for symbol in extract_symbols(&item.content, CALL_GRAPH_SYMBOLS_PER_CHUNK) {
                if seen.insert(symbol.clone()) {
                    symbols.push(symbol);
                }
            }
        }
        if symbols.is_empty() {
            return;
        }

        let related = guard.call_graph.related(&symbols, self.call_graph_config.max_hops);
        if related.is_empty() {
            return;
        }

        for item in scored.iter_mut() {
            if let Some(proximity) = related.get(&item.file) {
                item.score += proximity * self.config.call_graph_boost;
            }
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConcurrentCache;
    use crate::config::CacheConfig;
    use crate::store::EmbeddingStore;
    use crate::types::Chunk;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder {
        dim: usize,
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dimension(&self) -> usize {
            self.dim
        }
        fn model_name(&self) -> &str {
            "fixed-test-model"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }
    }

    async fn harness(
        chunks: Vec<Chunk>,
        search_config: HybridSearchConfig,
        query_vector: Vec<f32>,
    ) -> (HybridSearcher, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(EmbeddingStore::open(&dir.path().join("store.db")).await.expect("open store"));
        if !chunks.is_empty() {
            store.append_chunks(chunks).await.expect("append");
        }
        let dim = query_vector.len();
        let cache = Arc::new(
            ConcurrentCache::open(
                dir.path().join("cache"),
                CacheConfig::default(),
                AnnConfig {
                    ann_min_chunks: 1_000_000, // keep ANN disabled-by-threshold for these tests
                    ..Default::default()
                },
                "fixed-test-model".to_string(),
                store,
            )
            .await
            .expect("open cache"),
        );
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbedder { dim, vector: query_vector });
        let searcher = HybridSearcher::new(
            cache,
            embeddings,
            HybridSearchConfig {
                ann_enabled: false,
                ..search_config
            },
            AnnConfig::default(),
            CallGraphConfig::default(),
        );
        (searcher, dir)
    }

    #[tokio::test]
    async fn empty_store_returns_informational_message() {
        let (searcher, _dir) = harness(Vec::new(), HybridSearchConfig::default(), vec![1.0, 0.0]).await;
        let outcome = searcher.search("anything", 5).await.expect("search");
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.message.as_deref(), Some("No code has been indexed yet. Please wait for initial indexing to complete."));
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let (searcher, _dir) = harness(Vec::new(), HybridSearchConfig::default(), vec![1.0, 0.0]).await;
        let err = searcher.search("", 5).await.expect_err("empty query");
        assert!(matches!(err, EngineError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn max_results_zero_returns_empty_without_error() {
        let chunks = vec![Chunk {
            file: "a.rs".to_string(),
            start_line: 1,
            end_line: 2,
            content: "fn a() {}".to_string(),
            vector: vec![1.0, 0.0],
            token_count: Some(4),
        }];
        let (searcher, _dir) = harness(chunks, HybridSearchConfig::default(), vec![1.0, 0.0]).await;
        let outcome = searcher.search("target", 0).await.expect("search");
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn exact_substring_beats_weak_semantic_similarity() {
        let chunks = vec![
            Chunk {
                file: "a.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn contains_target() { /* target */ }".to_string(),
                vector: vec![0.01, 0.99995],
                token_count: Some(4),
            },
            Chunk {
                file: "b.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn unrelated() {}".to_string(),
                vector: vec![0.02, 0.9998],
                token_count: Some(4),
            },
        ];
        let config = HybridSearchConfig {
            semantic_weight: 1.0,
            exact_match_boost: 1.0,
            recency_boost: 0.0,
            call_graph_enabled: false,
            ann_enabled: false,
            ..Default::default()
        };
        let (searcher, _dir) = harness(chunks, config, vec![1.0, 0.0]).await;
        let outcome = searcher.search("target", 2).await.expect("search");
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].file, "a.rs");
        assert!(outcome.results[0].score > outcome.results[1].score);
    }

    #[tokio::test]
    async fn call_graph_proximity_can_overtake_a_slightly_higher_semantic_score() {
        let chunks = vec![
            Chunk {
                file: "defines_foo.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn foo_symbol() {}".to_string(),
                vector: vec![0.99, 0.1],
                token_count: Some(4),
            },
            Chunk {
                file: "calls_foo.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn other() {}".to_string(),
                vector: vec![0.9, 0.2],
                token_count: Some(4),
            },
        ];
        let config = HybridSearchConfig {
            semantic_weight: 1.0,
            exact_match_boost: 0.0,
            recency_boost: 0.0,
            call_graph_enabled: true,
            call_graph_boost: 10.0,
            ann_enabled: false,
            ..Default::default()
        };
        let (searcher, _dir) = harness(chunks, config, vec![1.0, 0.0]).await;
        searcher.cache.set_file_call_data(
            "defines_foo.rs".to_string(),
            crate::types::FileCallData {
                definitions: ["foo_symbol".to_string()].into_iter().collect(),
                calls: Default::default(),
            },
        );
        searcher.cache.set_file_call_data(
            "calls_foo.rs".to_string(),
            crate::types::FileCallData {
                definitions: Default::default(),
                calls: ["foo_symbol".to_string()].into_iter().collect(),
            },
        );
        searcher.cache.publish().await;

        let outcome = searcher.search("symbol lookup", 2).await.expect("search");
        assert_eq!(outcome.results[0].file, "calls_foo.rs");
    }

    #[tokio::test]
    async fn recency_boost_breaks_a_tie_between_identical_vectors() {
        let chunks = vec![
            Chunk {
                file: "recent.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn a() {}".to_string(),
                vector: vec![1.0, 0.0],
                token_count: Some(4),
            },
            Chunk {
                file: "stale.rs".to_string(),
                start_line: 1,
                end_line: 2,
                content: "fn a() {}".to_string(),
                vector: vec![1.0, 0.0],
                token_count: Some(4),
            },
        ];
        let config = HybridSearchConfig {
            semantic_weight: 1.0,
            exact_match_boost: 0.0,
            recency_boost: 0.5,
            recency_decay_days: 30.0,
            call_graph_enabled: false,
            ann_enabled: false,
            ..Default::default()
        };
        let (searcher, _dir) = harness(chunks, config, vec![1.0, 0.0]).await;

        let now_ms = now_millis();
        let decay_ms = 30.0 * 86_400_000.0;
        searcher.cache.set_file_metadata(
            "recent.rs".to_string(),
            crate::types::FileMetadata {
                mtime_ms: now_ms,
                hash: "h1".to_string(),
                size: 0,
            },
        );
        searcher.cache.set_file_metadata(
            "stale.rs".to_string(),
            crate::types::FileMetadata {
                mtime_ms: now_ms - decay_ms as i64,
                hash: "h2".to_string(),
                size: 0,
            },
        );

        let outcome = searcher.search("anything", 2).await.expect("search");
        assert_eq!(outcome.results[0].file, "recent.rs");
        assert!((outcome.results[0].score - outcome.results[1].score - 0.5).abs() < 0.05);
    }
}
