//! Chunk-level validation (spec §4.1 steps 6-7, §8 testable properties).

use crate::types::ChunkSpan;

/// Chunks whose trimmed text is shorter than this floor are discarded as
/// trivial fragments (spec §4.1 step 6, §8 invariant).
pub const MIN_CHUNK_CHARS: usize = 20;

/// Whether `span` is long enough to keep.
pub fn is_worth_keeping(span: &ChunkSpan, min_chars: usize) -> bool {
    span.text.trim().chars().count() >= min_chars
}

/// Filter a sequence of candidate spans, dropping trivial fragments and
/// truncating to `max_chunks_per_file` (spec §4.1 step 7).
pub fn finalize_spans(spans: Vec<ChunkSpan>, min_chars: usize, max_chunks_per_file: usize) -> Vec<ChunkSpan> {
    let mut kept: Vec<ChunkSpan> = spans
        .into_iter()
        .filter(|s| is_worth_keeping(s, min_chars))
        .collect();
    if kept.len() > max_chunks_per_file {
        kept.truncate(max_chunks_per_file);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str) -> ChunkSpan {
        ChunkSpan {
            text: text.to_string(),
            start_line: 1,
            end_line: 1,
            token_count: 1,
        }
    }

    #[test]
    fn trivial_fragment_is_dropped() {
        assert!(!is_worth_keeping(&span("x"), MIN_CHUNK_CHARS));
    }

    #[test]
    fn long_enough_fragment_is_kept() {
        let text = "a".repeat(MIN_CHUNK_CHARS);
        assert!(is_worth_keeping(&span(&text), MIN_CHUNK_CHARS));
    }

    #[test]
    fn finalize_spans_truncates_to_ceiling() {
        let spans: Vec<ChunkSpan> = (0..10).map(|_| span(&"x".repeat(30))).collect();
        let finalized = finalize_spans(spans, MIN_CHUNK_CHARS, 3);
        assert_eq!(finalized.len(), 3);
    }

    #[test]
    fn finalize_spans_drops_all_trivial_fragments() {
        let spans = vec![span("a"), span("b"), span(&"c".repeat(25))];
        let finalized = finalize_spans(spans, MIN_CHUNK_CHARS, 1000);
        assert_eq!(finalized.len(), 1);
    }
}
