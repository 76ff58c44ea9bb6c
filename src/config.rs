//! Engine configuration.
//!
//! Aggregates the per-component knobs named throughout spec §4 into one
//! serde-deserializable tree, following `codex-retrieval::config`'s pattern
//! of `#[serde(default = "fn")]` fields plus a `validate()` pass. Loading
//! the TOML file itself (locating it, merging CLI overrides) belongs to
//! the host process; this module only owns the typed struct.

use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use crate::error::EngineError;
use crate::error::Result;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub ann: AnnConfig,
    #[serde(default)]
    pub call_graph: CallGraphConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: HybridSearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            ann: AnnConfig::default(),
            call_graph: CallGraphConfig::default(),
            cache: CacheConfig::default(),
            search: HybridSearchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::ConfigError {
            field: "<root>".to_string(),
            cause: e.to_string(),
        })
    }

    /// Validate every sub-config, accumulating the first failure found.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        self.ann.validate()?;
        self.call_graph.validate()?;
        self.cache.validate()?;
        self.search.validate()?;
        Ok(())
    }
}

/// Chunker knobs (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkerConfig {
    /// Hard per-chunk token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Soft target, `0.85 * max_tokens` by default.
    #[serde(default)]
    pub target_tokens: Option<u32>,
    /// Overlap budget, `min(100, 0.18 * target_tokens)` by default.
    #[serde(default)]
    pub overlap_tokens: Option<u32>,
    /// Hard ceiling on chunks emitted per file.
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
    /// Minimum trimmed chunk length in characters; shorter chunks are
    /// discarded.
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            target_tokens: None,
            overlap_tokens: None,
            max_chunks_per_file: default_max_chunks_per_file(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

impl ChunkerConfig {
    /// Resolved target token budget, honoring an explicit override.
    pub fn target_tokens(&self) -> u32 {
        self.target_tokens
            .unwrap_or_else(|| ((self.max_tokens as f64) * 0.85) as u32)
    }

    /// Resolved overlap token budget, honoring an explicit override.
    pub fn overlap_tokens(&self) -> u32 {
        self.overlap_tokens.unwrap_or_else(|| {
            let target = self.target_tokens() as f64;
            (100.0_f64).min(0.18 * target) as u32
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(EngineError::ConfigError {
                field: "chunker.max_tokens".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.max_chunks_per_file == 0 {
            return Err(EngineError::ConfigError {
                field: "chunker.max_chunks_per_file".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_max_tokens() -> u32 {
    512
}
fn default_max_chunks_per_file() -> usize {
    1000
}
fn default_min_chunk_chars() -> usize {
    20
}

/// Distance metric for the ANN side index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
    Ip,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Cosine
    }
}

/// ANN side index knobs (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnConfig {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Minimum store size before the ANN index is built at all.
    #[serde(default = "default_ann_min_chunks")]
    pub ann_min_chunks: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: f64,
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Rebuild attempts before the index is reported unavailable.
    #[serde(default = "default_rebuild_retries")]
    pub rebuild_retries: u32,
    /// Cooldown after exhausting rebuild retries, before another attempt.
    #[serde(default = "default_cooldown")]
    pub cooldown: Duration,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            ann_min_chunks: default_ann_min_chunks(),
            candidate_multiplier: default_candidate_multiplier(),
            min_candidates: default_min_candidates(),
            max_candidates: default_max_candidates(),
            rebuild_retries: default_rebuild_retries(),
            cooldown: default_cooldown(),
        }
    }
}

impl AnnConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 || self.ef_construction == 0 || self.ef_search == 0 {
            return Err(EngineError::ConfigError {
                field: "ann.{m,ef_construction,ef_search}".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.min_candidates > self.max_candidates {
            return Err(EngineError::ConfigError {
                field: "ann.{min_candidates,max_candidates}".to_string(),
                cause: "min_candidates must be <= max_candidates".to_string(),
            });
        }
        Ok(())
    }
}

fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}
fn default_ann_min_chunks() -> usize {
    256
}
fn default_candidate_multiplier() -> f64 {
    3.0
}
fn default_min_candidates() -> usize {
    50
}
fn default_max_candidates() -> usize {
    2000
}
fn default_rebuild_retries() -> u32 {
    3
}
fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

/// Call-graph side index knobs (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallGraphConfig {
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    #[serde(default = "default_min_symbol_len")]
    pub min_symbol_len: usize,
}

impl Default for CallGraphConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            min_symbol_len: default_min_symbol_len(),
        }
    }
}

impl CallGraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_hops == 0 {
            return Err(EngineError::ConfigError {
                field: "call_graph.max_hops".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_max_hops() -> u32 {
    1
}
fn default_min_symbol_len() -> usize {
    3
}

/// Concurrent cache knobs (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_reader_drain_timeout")]
    pub reader_drain_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reader_drain_timeout: default_reader_drain_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reader_drain_timeout.is_zero() {
            return Err(EngineError::ConfigError {
                field: "cache.reader_drain_timeout".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_reader_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Hybrid search knobs (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridSearchConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_exact_match_boost")]
    pub exact_match_boost: f32,
    #[serde(default = "default_partial_match_factor")]
    pub partial_match_factor: f32,
    #[serde(default = "default_recency_boost")]
    pub recency_boost: f32,
    #[serde(default = "default_recency_decay_days")]
    pub recency_decay_days: f32,
    #[serde(default = "default_call_graph_enabled")]
    pub call_graph_enabled: bool,
    #[serde(default = "default_call_graph_boost")]
    pub call_graph_boost: f32,
    #[serde(default = "default_ann_enabled")]
    pub ann_enabled: bool,
    #[serde(default = "default_text_match_max_candidates")]
    pub text_match_max_candidates: usize,
    #[serde(default = "default_full_scan_threshold")]
    pub full_scan_threshold: usize,
    /// Embedding dimension the scorer truncates/renormalizes to; `None`
    /// keeps the model's native dimension.
    #[serde(default)]
    pub embedding_dimension: Option<usize>,
    #[serde(default = "default_scoring_batch_size")]
    pub scoring_batch_size: usize,
    #[serde(default = "default_keyword_augmentation_batch_size")]
    pub keyword_augmentation_batch_size: usize,
    #[serde(default = "default_recency_lru_target")]
    pub recency_lru_target: usize,
    #[serde(default = "default_recency_lru_max")]
    pub recency_lru_max: usize,
    #[serde(default = "default_recency_stat_fanout")]
    pub recency_stat_fanout: usize,
    #[serde(default = "default_recency_stat_threshold_files")]
    pub recency_stat_threshold_files: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            exact_match_boost: default_exact_match_boost(),
            partial_match_factor: default_partial_match_factor(),
            recency_boost: default_recency_boost(),
            recency_decay_days: default_recency_decay_days(),
            call_graph_enabled: default_call_graph_enabled(),
            call_graph_boost: default_call_graph_boost(),
            ann_enabled: default_ann_enabled(),
            text_match_max_candidates: default_text_match_max_candidates(),
            full_scan_threshold: default_full_scan_threshold(),
            embedding_dimension: None,
            scoring_batch_size: default_scoring_batch_size(),
            keyword_augmentation_batch_size: default_keyword_augmentation_batch_size(),
            recency_lru_target: default_recency_lru_target(),
            recency_lru_max: default_recency_lru_max(),
            recency_stat_fanout: default_recency_stat_fanout(),
            recency_stat_threshold_files: default_recency_stat_threshold_files(),
        }
    }
}

impl HybridSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.text_match_max_candidates == 0 {
            return Err(EngineError::ConfigError {
                field: "search.text_match_max_candidates".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.recency_lru_target > self.recency_lru_max {
            return Err(EngineError::ConfigError {
                field: "search.{recency_lru_target,recency_lru_max}".to_string(),
                cause: "target must be <= max".to_string(),
            });
        }
        Ok(())
    }
}

fn default_semantic_weight() -> f32 {
    1.0
}
fn default_exact_match_boost() -> f32 {
    1.0
}
fn default_partial_match_factor() -> f32 {
    0.3
}
fn default_recency_boost() -> f32 {
    0.0
}
fn default_recency_decay_days() -> f32 {
    30.0
}
fn default_call_graph_enabled() -> bool {
    false
}
fn default_call_graph_boost() -> f32 {
    0.0
}
fn default_ann_enabled() -> bool {
    true
}
fn default_text_match_max_candidates() -> usize {
    2000
}
fn default_full_scan_threshold() -> usize {
    2000
}
fn default_scoring_batch_size() -> usize {
    500
}
fn default_keyword_augmentation_batch_size() -> usize {
    100
}
fn default_recency_lru_target() -> usize {
    4000
}
fn default_recency_lru_max() -> usize {
    5000
}
fn default_recency_stat_fanout() -> usize {
    50
}
fn default_recency_stat_threshold_files() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_target_and_overlap_defaults() {
        let c = ChunkerConfig {
            max_tokens: 1000,
            ..Default::default()
        };
        assert_eq!(c.target_tokens(), 850);
        // overlap = min(100, 0.18 * 850) = min(100, 153) = 100
        assert_eq!(c.overlap_tokens(), 100);
    }

    #[test]
    fn chunker_overlap_scales_below_cap() {
        let c = ChunkerConfig {
            max_tokens: 200,
            ..Default::default()
        };
        // target = 170, overlap = min(100, 30.6) = 30
        assert_eq!(c.target_tokens(), 170);
        assert_eq!(c.overlap_tokens(), 30);
    }

    #[test]
    fn validate_rejects_zero_max_tokens() {
        let c = ChunkerConfig {
            max_tokens: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn ann_config_rejects_inverted_candidate_bounds() {
        let c = AnnConfig {
            min_candidates: 100,
            max_candidates: 10,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn engine_config_default_round_trips_through_toml() {
        let cfg = EngineConfig::default();
        let s = toml::to_string(&cfg).expect("serialize default config");
        let parsed = EngineConfig::from_toml_str(&s).expect("parse serialized config");
        assert_eq!(cfg, parsed);
    }
}
