//! The sole public surface named by spec §6 that this crate owns:
//! `semantic_search` and `ann_config`. `index_codebase`, `clear_cache`,
//! and `find_similar_code` belong to external collaborators and are not
//! implemented here.
//!
//! Response formatting is grounded on
//! `codex-rs/retrieval/src/service.rs` for the general shape of a thin
//! facade translating internal results into a host-facing response type.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::cache::ConcurrentCache;
use crate::error::EngineError;
use crate::search::HybridSearcher;
use crate::types::SearchHit;

const DEFAULT_MAX_RESULTS: usize = 10;
const MIN_EF_SEARCH: i64 = 1;
const MAX_EF_SEARCH: i64 = 1000;

/// A tool call's result: either a rendered text block, or an `isError`
/// response carrying a short message (spec §6, §7 "User-visible
/// behavior").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// `ann_config`'s action discriminant (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AnnConfigAction {
    Stats,
    SetEfSearch {
        #[serde(rename = "efSearch")]
        ef_search: i64,
    },
    Rebuild,
}

/// Facade over [`HybridSearcher`] and [`ConcurrentCache`] exposing exactly
/// the two tool operations this spec scopes.
pub struct ToolApi {
    searcher: Arc<HybridSearcher>,
    cache: Arc<ConcurrentCache>,
}

impl ToolApi {
    pub fn new(searcher: Arc<HybridSearcher>, cache: Arc<ConcurrentCache>) -> Self {
        Self { searcher, cache }
    }

    /// `semantic_search(query, maxResults?)` (spec §6).
    pub async fn semantic_search(&self, query: &str, max_results: Option<usize>) -> ToolResponse {
        if query.trim().is_empty() {
            return ToolResponse::error("query must be a non-empty string");
        }
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);

        match self.searcher.search(query, max_results).await {
            Ok(outcome) => {
                if let Some(message) = outcome.message {
                    ToolResponse::ok(message)
                } else if outcome.results.is_empty() {
                    ToolResponse::ok("No results found for this query.")
                } else {
                    ToolResponse::ok(render_results(&outcome.results))
                }
            }
            Err(EngineError::InvalidQuery { reason }) => ToolResponse::error(reason),
            Err(e) => {
                tracing::warn!(error = %e, "semantic_search failed");
                ToolResponse::error(format!("search failed: {e}"))
            }
        }
    }

    /// `ann_config({ action, efSearch? })` (spec §6).
    pub async fn ann_config(&self, action: AnnConfigAction) -> serde_json::Value {
        match action {
            AnnConfigAction::Stats => {
                let metrics = self.cache.metrics();
                let mut response = match self.cache.ann_stats() {
                    Some(stats) => json!({
                        "available": true,
                        "dim": stats.dim,
                        "count": stats.count,
                        "metric": stats.metric,
                        "m": stats.m,
                        "efConstruction": stats.ef_construction,
                        "efSearch": stats.ef_search,
                    }),
                    None => json!({ "available": false }),
                };
                response["metrics"] = json!(metrics);
                response
            }
            AnnConfigAction::SetEfSearch { ef_search } => {
                if !(MIN_EF_SEARCH..=MAX_EF_SEARCH).contains(&ef_search) {
                    return json!({ "success": false });
                }
                self.cache.set_ef_search(ef_search as usize).await;
                json!({ "success": true, "efSearch": ef_search })
            }
            AnnConfigAction::Rebuild => {
                let built = self.cache.force_rebuild_ann().await;
                json!({ "success": built })
            }
        }
    }
}

/// `## Result N (Relevance: P%)` / `**File:**` / `**Lines:**` / fenced
/// code block, language tag = file extension without the dot (spec §6).
fn render_results(results: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in results.iter().enumerate() {
        let relevance_pct = (hit.score.clamp(0.0, 1.0) * 100.0).round() as i64;
        let lang = Path::new(&hit.file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        out.push_str(&format!("## Result {} (Relevance: {}%)\n", i + 1, relevance_pct));
        out.push_str(&format!("**File:** {}\n", hit.file));
        out.push_str(&format!("**Lines:** {}-{}\n\n", hit.start_line, hit.end_line));
        out.push_str(&format!("```{lang}\n{}\n```\n\n", hit.content));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(file: &str, score: f32) -> SearchHit {
        SearchHit {
            file: file.to_string(),
            start_line: 1,
            end_line: 3,
            score,
            content: "fn a() {}".to_string(),
        }
    }

    #[test]
    fn render_results_tags_code_block_with_extension_minus_dot() {
        let rendered = render_results(&[hit("src/lib.rs", 0.9)]);
        assert!(rendered.contains("```rs\n"));
        assert!(rendered.contains("**File:** src/lib.rs"));
        assert!(rendered.contains("**Lines:** 1-3"));
        assert!(rendered.contains("## Result 1 (Relevance: 90%)"));
    }

    #[test]
    fn render_results_clamps_relevance_above_one() {
        let rendered = render_results(&[hit("a.py", 1.5)]);
        assert!(rendered.contains("Relevance: 100%"));
    }
}
