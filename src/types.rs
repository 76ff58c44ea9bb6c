//! Core data types shared across the engine (spec §3).

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// A contiguous, token-bounded slice of a source file with its embedding.
///
/// Immutable once stored: callers that need an updated chunk replace it via
/// `EmbeddingStore::remove_file_chunks` + `append_chunks`, they never mutate
/// a record in place (spec §3 "Lifecycles").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Canonical absolute path, platform-normalized (spec §3).
    pub file: String,
    /// 1-based inclusive start line.
    pub start_line: u32,
    /// 1-based inclusive end line.
    pub end_line: u32,
    /// UTF-8 chunk text.
    pub content: String,
    /// Unit-norm embedding vector, exactly `dim` components.
    pub vector: Vec<f32>,
    /// Advisory token estimate assigned by the chunker.
    pub token_count: Option<u32>,
}

/// A chunk produced by the chunker, before an embedding has been computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkSpan {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
    pub token_count: u32,
}

/// A lightweight reference to a stored chunk, without content or vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRef {
    pub index: usize,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// A fully materialized chunk fetched for scoring/display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadedChunk {
    pub index: usize,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub vector: Vec<f32>,
}

/// A chunk index whose vector bytes were short/absent on read (spec §4.3
/// "Dimension guard" — individual vectors shorter than `dim * sizeof(f32)`
/// are reported as missing, not treated as a fatal error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorMissing {
    pub index: usize,
}

/// Embedding store metadata (spec §3 "Store metadata").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreMetadata {
    pub version: u32,
    pub embedding_model: String,
    pub dim: usize,
    pub count: usize,
    pub created_at: i64,
}

/// Per-file metadata tracked for re-index/recency decisions (spec §3
/// "File-metadata map").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub mtime_ms: i64,
    pub hash: String,
    pub size: u64,
}

/// Per-file call-graph record (spec §3 "Call-graph per-file record").
///
/// `calls` never contains a symbol also present in `definitions` — the
/// extractor strips self-loops before this type is ever populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCallData {
    pub definitions: std::collections::BTreeSet<String>,
    pub calls: std::collections::BTreeSet<String>,
}

/// ANN side index metadata (spec §3 "ANN metadata").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnMetadata {
    pub version: u32,
    pub embedding_model: String,
    pub dim: usize,
    pub count: usize,
    pub metric: crate::config::Metric,
    pub m: usize,
    pub ef_construction: usize,
}

/// The current on-disk format version. Bumping this invalidates existing
/// stores/indexes on read (spec §3 "version ... bump invalidates on read").
pub const CURRENT_VERSION: u32 = 1;

/// A single hybrid search hit (spec §4.7 contract).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    pub content: String,
}

/// `search()`'s top-level return value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub message: Option<String>,
}

/// Canonicalize a file path the way the store keys it: made absolute
/// relative to the current directory when relative, and lowercased when
/// the platform's filesystem is case-insensitive (spec §3 "file").
pub fn canonical_key(path: &Path) -> String {
    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let s = absolute.to_string_lossy().replace('\\', "/");
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        s.to_lowercase()
    } else {
        s
    }
}
