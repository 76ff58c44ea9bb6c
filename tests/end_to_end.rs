//! End-to-end scenarios assembling the full stack through its public API:
//! chunker -> embedding store -> concurrent cache -> hybrid searcher ->
//! tool API (spec §8 "Concrete end-to-end scenarios").
//!
//! Unlike the in-module unit tests, these exercise the public crate
//! boundary only (no `pub(crate)` access), the way an external indexer or
//! host process would.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use codesearch_engine::cache::ConcurrentCache;
use codesearch_engine::callgraph::extract_call_data;
use codesearch_engine::chunking::chunk_file;
use codesearch_engine::config::AnnConfig;
use codesearch_engine::config::CacheConfig;
use codesearch_engine::config::ChunkerConfig;
use codesearch_engine::config::HybridSearchConfig;
use codesearch_engine::embeddings::EmbeddingProvider;
use codesearch_engine::search::HybridSearcher;
use codesearch_engine::store::EmbeddingStore;
use codesearch_engine::tool_api::AnnConfigAction;
use codesearch_engine::tool_api::ToolApi;
use codesearch_engine::types::canonical_key;
use codesearch_engine::types::Chunk;
use codesearch_engine::types::FileMetadata;
use codesearch_engine::Result;

/// Deterministic trigram-hash embedder, the same shape as the demo CLI's
/// stand-in, kept local to this test module so the suite never depends on
/// a real model being on hand.
struct HashEmbedder {
    dim: usize,
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "test-hash-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.len() < 3 {
            vector[0] = 1.0;
        } else {
            for window in chars.windows(3) {
                let mut h: u64 = 1469598103934665603;
                for c in window {
                    h ^= *c as u64;
                    h = h.wrapping_mul(1099511628211);
                }
                vector[(h as usize) % self.dim] += 1.0;
            }
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

async fn open_stack(
    dir: &TempDir,
    search_config: HybridSearchConfig,
    ann_config: AnnConfig,
) -> (Arc<ConcurrentCache>, Arc<HybridSearcher>, Arc<dyn EmbeddingProvider>) {
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder { dim: 32 });
    let store = Arc::new(
        EmbeddingStore::open(&dir.path().join("store.db"))
            .await
            .expect("open store"),
    );
    let cache = Arc::new(
        ConcurrentCache::open(
            dir.path().join("cache"),
            CacheConfig::default(),
            ann_config,
            embeddings.model_name().to_string(),
            store,
        )
        .await
        .expect("open cache"),
    );
    let searcher = Arc::new(HybridSearcher::new(
        cache.clone(),
        embeddings.clone(),
        search_config,
        AnnConfig::default(),
        Default::default(),
    ));
    (cache, searcher, embeddings)
}

async fn index_file(
    cache: &ConcurrentCache,
    embeddings: &dyn EmbeddingProvider,
    path: &str,
    content: &str,
) {
    let chunker_config = ChunkerConfig::default();
    let spans = chunk_file(Path::new(path), content, &chunker_config);
    let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
    let vectors = embeddings.embed_batch(&texts).await.expect("embed");

    let key = canonical_key(Path::new(path));
    let chunks: Vec<Chunk> = spans
        .into_iter()
        .zip(vectors)
        .map(|(span, vector)| Chunk {
            file: key.clone(),
            start_line: span.start_line,
            end_line: span.end_line,
            content: span.text,
            vector,
            token_count: Some(span.token_count),
        })
        .collect();
    cache.append_chunks(chunks).await.expect("append chunks");

    let call_data = extract_call_data(content, Path::new(path));
    cache.set_file_call_data(key.clone(), call_data);
    cache.set_file_metadata(
        key,
        FileMetadata {
            mtime_ms: 0,
            hash: "unused-in-these-tests".to_string(),
            size: content.len() as u64,
        },
    );
}

#[tokio::test]
async fn empty_index_reports_the_informational_message_through_tool_api() {
    let dir = TempDir::new().expect("tempdir");
    let (cache, searcher, _embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), AnnConfig::default()).await;
    let api = ToolApi::new(searcher, cache);

    let response = api.semantic_search("anything", Some(5)).await;
    assert!(!response.is_error);
    assert!(response.text.contains("No code has been indexed yet"));
}

#[tokio::test]
async fn empty_query_is_reported_as_an_error_response_not_a_panic() {
    let dir = TempDir::new().expect("tempdir");
    let (cache, searcher, _embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), AnnConfig::default()).await;
    let api = ToolApi::new(searcher, cache);

    let response = api.semantic_search("   ", Some(5)).await;
    assert!(response.is_error);
}

#[tokio::test]
async fn full_pipeline_finds_the_chunk_containing_the_query_literal() {
    let dir = TempDir::new().expect("tempdir");
    let config = HybridSearchConfig {
        ann_enabled: false, // below ann_min_chunks anyway; keep the scenario linear-scan-only
        ..Default::default()
    };
    let (cache, searcher, embeddings) = open_stack(&dir, config, AnnConfig::default()).await;

    index_file(
        &cache,
        embeddings.as_ref(),
        "src/widget.rs",
        "pub fn render_widget_tree(root: &Widget) -> String {\n    walk_and_render(root)\n}\n",
    )
    .await;
    index_file(
        &cache,
        embeddings.as_ref(),
        "src/unrelated.rs",
        "pub fn parse_config_file(path: &str) -> Config {\n    load_toml(path)\n}\n",
    )
    .await;

    let api = ToolApi::new(searcher, cache);
    let response = api.semantic_search("render_widget_tree", Some(5)).await;
    assert!(!response.is_error);
    assert!(response.text.contains("## Result 1"));
    assert!(response.text.contains("widget.rs"));
    assert!(response.text.contains("```rs"));
}

#[tokio::test]
async fn max_results_zero_yields_no_results_and_no_error() {
    let dir = TempDir::new().expect("tempdir");
    let (cache, searcher, embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), AnnConfig::default()).await;
    index_file(&cache, embeddings.as_ref(), "a.rs", "pub fn a() {\n    1;\n}\n").await;

    let api = ToolApi::new(searcher, cache);
    let response = api.semantic_search("a", Some(0)).await;
    assert!(!response.is_error);
}

#[tokio::test]
async fn reindexing_unchanged_content_replaces_chunks_without_growing_the_store() {
    let dir = TempDir::new().expect("tempdir");
    let (cache, _searcher, embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), AnnConfig::default()).await;

    let content = "pub fn stable_function() {\n    do_work();\n}\n";
    index_file(&cache, embeddings.as_ref(), "stable.rs", content).await;
    let first_count = cache.read().store.length().await.expect("length");

    // Re-indexing the same content (as the CLI's hash-gate would skip, but
    // here we drive the store directly) must not silently accumulate
    // duplicate chunks once old ones are removed first.
    let key = canonical_key(Path::new("stable.rs"));
    cache.remove_file_chunks(&key).await.expect("remove");
    index_file(&cache, embeddings.as_ref(), "stable.rs", content).await;
    let second_count = cache.read().store.length().await.expect("length");

    assert_eq!(first_count, second_count);
}

#[tokio::test]
async fn ann_config_stats_reports_unavailable_below_the_build_threshold() {
    let dir = TempDir::new().expect("tempdir");
    let ann_config = AnnConfig {
        ann_min_chunks: 1_000_000,
        ..Default::default()
    };
    let (cache, searcher, embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), ann_config).await;
    index_file(&cache, embeddings.as_ref(), "a.rs", "pub fn a() {\n    1;\n}\n").await;

    let api = ToolApi::new(searcher, cache);
    let stats = api.ann_config(AnnConfigAction::Stats).await;
    assert_eq!(stats["available"], serde_json::json!(false));
}

#[tokio::test]
async fn ann_config_set_ef_search_rejects_out_of_range_values() {
    let dir = TempDir::new().expect("tempdir");
    let (cache, searcher, _embeddings) =
        open_stack(&dir, HybridSearchConfig::default(), AnnConfig::default()).await;
    let api = ToolApi::new(searcher, cache);

    let result = api
        .ann_config(AnnConfigAction::SetEfSearch { ef_search: 0 })
        .await;
    assert_eq!(result["success"], serde_json::json!(false));

    let result = api
        .ann_config(AnnConfigAction::SetEfSearch { ef_search: 5000 })
        .await;
    assert_eq!(result["success"], serde_json::json!(false));

    let result = api
        .ann_config(AnnConfigAction::SetEfSearch { ef_search: 128 })
        .await;
    assert_eq!(result["success"], serde_json::json!(true));
}

#[tokio::test]
async fn call_graph_proximity_lifts_a_calling_file_above_an_unrelated_one() {
    let dir = TempDir::new().expect("tempdir");
    let config = HybridSearchConfig {
        call_graph_enabled: true,
        call_graph_boost: 5.0,
        ann_enabled: false,
        ..Default::default()
    };
    let (cache, searcher, embeddings) = open_stack(&dir, config, AnnConfig::default()).await;

    index_file(
        &cache,
        embeddings.as_ref(),
        "src/core.rs",
        "pub fn dispatch_event(event: Event) {\n    handle(event)\n}\n",
    )
    .await;
    index_file(
        &cache,
        embeddings.as_ref(),
        "src/handler.rs",
        "pub fn process() {\n    dispatch_event(make_event())\n}\n",
    )
    .await;
    index_file(
        &cache,
        embeddings.as_ref(),
        "src/unrelated.rs",
        "pub fn totally_different_concern() {\n    noop()\n}\n",
    )
    .await;

    let api = ToolApi::new(searcher, cache);
    let response = api.semantic_search("dispatch_event", Some(3)).await;
    assert!(!response.is_error);
    // The calling file should be pulled into the top results by the
    // call-graph boost even though its own semantic/text match is weaker
    // than the defining file's exact substring hit.
    assert!(response.text.contains("handler.rs"));
}
