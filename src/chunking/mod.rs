//! Token-bounded, language-aware source chunking (spec §4.1).
//!
//! Splits file content into overlapping spans sized for the embedding
//! model's context window, discards trivial fragments, and caps the
//! number of chunks a single file can contribute. Deliberately heuristic:
//! no tree-sitter or other symbol-accurate parser is used anywhere in this
//! module (spec §4.1 Non-goals).

pub mod language;
pub mod splitter;
pub mod token_estimate;
pub mod validation;

use std::path::Path;

use crate::config::ChunkerConfig;
use crate::types::ChunkSpan;

/// Chunk `content` (the contents of `path`) into token-bounded spans.
pub fn chunk_file(path: &Path, content: &str, config: &ChunkerConfig) -> Vec<ChunkSpan> {
    let family = language::detect_family(path);
    let spans = splitter::split(content, family, config);
    validation::finalize_spans(spans, config.min_chunk_chars, config.max_chunks_per_file)
}
