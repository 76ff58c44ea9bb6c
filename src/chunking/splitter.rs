//! The token-bounded line scan itself (spec §4.1 steps 1-5).
//!
//! This tracks just enough syntactic state to avoid splitting inside a
//! string literal or a block comment: a combined bracket-depth counter and
//! an in-string/in-block-comment flag. It is not a parser - nested
//! comments, raw strings, and language-specific escape quirks are not
//! modeled beyond what the heuristic below captures.

use crate::chunking::language::block_comment_delims;
use crate::chunking::language::is_good_split_point;
use crate::chunking::language::line_comment_marker;
use crate::chunking::language::LanguageFamily;
use crate::chunking::token_estimate::estimate_tokens;
use crate::config::ChunkerConfig;
use crate::types::ChunkSpan;

/// Backward-overlap walk is bounded to this many lines regardless of token
/// budget, so a file of all-blank lines can't spin forever (spec §4.1 step
/// 5 guard).
const MAX_OVERLAP_LINES: usize = 50;
/// Within that walk, at most this many *blank* lines count toward the
/// guard before the walk gives up early (spec §4.1 step 5 guard).
const MAX_OVERLAP_BLANK_LINES: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    depth: i32,
    in_string: Option<char>,
    in_block_comment: bool,
}

struct ScannedLine {
    text: String,
    token_count: u32,
    /// State as it stood at the *end* of this line.
    state_after: ScanState,
    good_split_point: bool,
}

/// Split `content` into token-bounded spans for `family`.
pub fn split(content: &str, family: LanguageFamily, config: &ChunkerConfig) -> Vec<ChunkSpan> {
    if content.is_empty() {
        return Vec::new();
    }
    let target = config.target_tokens();
    let max = config.max_tokens;
    let overlap_budget = config.overlap_tokens();

    let scanned = scan_lines(content, family);

    let mut spans = Vec::new();
    let mut pending: Vec<&ScannedLine> = Vec::new();
    let mut pending_tokens: u32 = 0;
    let mut pending_start_idx = 0usize;

    let mut idx = 0usize;
    while idx < scanned.len() {
        let line = &scanned[idx];

        if line.token_count > max {
            if !pending.is_empty() {
                spans.push(build_span(&pending, pending_start_idx));
                pending.clear();
                pending_tokens = 0;
            }
            spans.extend(split_oversized_line(line, idx, target));
            pending_start_idx = idx + 1;
            idx += 1;
            continue;
        }

        let would_overflow = pending_tokens + line.token_count > target;
        let state_before = if idx == 0 {
            ScanState::default()
        } else {
            scanned[idx - 1].state_after
        };
        let safe_to_split = state_before.in_string.is_none()
            && !state_before.in_block_comment
            && state_before.depth <= 1;
        let at_good_boundary = !pending.is_empty()
            && line.good_split_point
            && safe_to_split
            && (pending_tokens as f64) >= 0.6 * (target as f64);

        if (would_overflow && !pending.is_empty()) || at_good_boundary {
            spans.push(build_span(&pending, pending_start_idx));
            let (new_pending, new_tokens, resume_idx) =
                backward_overlap(&scanned, idx, overlap_budget);
            pending = new_pending;
            pending_tokens = new_tokens;
            pending_start_idx = resume_idx;
        }

        pending.push(line);
        pending_tokens += line.token_count;
        idx += 1;
    }

    if !pending.is_empty() {
        spans.push(build_span(&pending, pending_start_idx));
    }

    spans
}

fn scan_lines(content: &str, family: LanguageFamily) -> Vec<ScannedLine> {
    let line_marker = line_comment_marker(family);
    let block_delims = block_comment_delims(family);

    let mut state = ScanState::default();
    content
        .lines()
        .map(|raw| {
            let state_after = advance_state(raw, state, line_marker, block_delims);
            let scanned = ScannedLine {
                text: raw.to_string(),
                token_count: estimate_tokens(raw),
                state_after,
                good_split_point: is_good_split_point(raw, family),
            };
            state = state_after;
            scanned
        })
        .collect()
}

fn advance_state(
    line: &str,
    mut state: ScanState,
    line_marker: Option<&str>,
    block_delims: Option<(&str, &str)>,
) -> ScanState {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];

        if state.in_block_comment {
            if let Some((_, end)) = block_delims {
                if matches_at(&chars, i, end) {
                    state.in_block_comment = false;
                    i += end.chars().count();
                    continue;
                }
            }
            i += 1;
            continue;
        }

        if let Some(quote) = state.in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                state.in_string = None;
            }
            i += 1;
            continue;
        }

        if let Some(marker) = line_marker {
            if matches_at(&chars, i, marker) {
                break;
            }
        }
        if let Some((start, _)) = block_delims {
            if matches_at(&chars, i, start) {
                state.in_block_comment = true;
                i += start.chars().count();
                continue;
            }
        }

        match c {
            '"' | '\'' | '`' => state.in_string = Some(c),
            '{' | '[' | '(' => state.depth += 1,
            '}' | ']' | ')' => state.depth -= 1,
            _ => {}
        }
        i += 1;
    }

    state
}

fn matches_at(chars: &[char], at: usize, needle: &str) -> bool {
    let needle_chars: Vec<char> = needle.chars().collect();
    if at + needle_chars.len() > chars.len() {
        return false;
    }
    chars[at..at + needle_chars.len()] == needle_chars[..]
}

fn build_span(lines: &[&ScannedLine], start_idx: usize) -> ChunkSpan {
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let token_count = lines.iter().map(|l| l.token_count).sum();
    ChunkSpan {
        text,
        start_line: (start_idx + 1) as u32,
        end_line: (start_idx + lines.len()) as u32,
        token_count,
    }
}

/// Character-wise split of a single line whose own token estimate exceeds
/// the hard cap (spec §4.1 step 2). Each piece is sized so its estimated
/// token count stays near `target`.
fn split_oversized_line(line: &ScannedLine, line_idx: usize, target: u32) -> Vec<ChunkSpan> {
    let chars: Vec<char> = line.text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    // Rough chars-per-token ratio derived from this line's own estimate,
    // floored so pathologically dense lines still make forward progress.
    let ratio = (chars.len() as f64) / (line.token_count.max(1) as f64);
    let piece_chars = ((target as f64) * ratio).ceil().max(100.0) as usize;

    chars
        .chunks(piece_chars)
        .map(|piece| {
            let text: String = piece.iter().collect();
            ChunkSpan {
                token_count: estimate_tokens(&text),
                text,
                start_line: (line_idx + 1) as u32,
                end_line: (line_idx + 1) as u32,
            }
        })
        .collect()
}

/// Walk backward from `split_idx` (exclusive) accumulating lines until
/// `overlap_budget` tokens are covered, bounded by the guards above.
/// Returns the overlap lines (oldest first), their total token count, and
/// the 0-based line index the next span should report as its start.
fn backward_overlap<'a>(
    scanned: &'a [ScannedLine],
    split_idx: usize,
    overlap_budget: u32,
) -> (Vec<&'a ScannedLine>, u32, usize) {
    if overlap_budget == 0 || split_idx == 0 {
        return (Vec::new(), 0, split_idx);
    }

    let mut collected: Vec<&ScannedLine> = Vec::new();
    let mut tokens = 0u32;
    let mut blanks = 0usize;
    let mut steps = 0usize;
    let mut cursor = split_idx;

    while cursor > 0 && steps < MAX_OVERLAP_LINES && tokens < overlap_budget {
        let candidate = &scanned[cursor - 1];
        if candidate.text.trim().is_empty() {
            blanks += 1;
            if blanks > MAX_OVERLAP_BLANK_LINES {
                break;
            }
        }
        collected.push(candidate);
        tokens += candidate.token_count;
        cursor -= 1;
        steps += 1;
    }

    collected.reverse();
    (collected, tokens, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerConfig;

    fn cfg(max_tokens: u32) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens,
            ..Default::default()
        }
    }

    #[test]
    fn empty_content_produces_no_spans() {
        let spans = split("", LanguageFamily::Rust, &cfg(512));
        assert!(spans.is_empty());
    }

    #[test]
    fn small_file_is_a_single_span() {
        let content = "fn main() {\n    println!(\"hi\");\n}\n";
        let spans = split(content, LanguageFamily::Rust, &cfg(512));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 1);
    }

    #[test]
    fn oversized_single_line_is_split_into_multiple_pieces() {
        let long_line = "x".repeat(5000);
        let spans = split(&long_line, LanguageFamily::Rust, &cfg(50));
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.token_count <= 200);
        }
    }

    #[test]
    fn large_file_splits_at_good_boundaries() {
        let mut content = String::new();
        for i in 0..40 {
            content.push_str(&format!("pub fn function_{i}() {{\n"));
            content.push_str("    let value = 1;\n");
            content.push_str("    value + 1;\n");
            content.push_str("}\n\n");
        }
        let spans = split(&content, LanguageFamily::Rust, &cfg(60));
        assert!(spans.len() > 1);
        // Every span after the first should start on or before a line that
        // existed in the source (overlap never invents lines).
        for span in &spans {
            assert!(span.start_line >= 1);
            assert!(span.end_line >= span.start_line);
        }
    }

    #[test]
    fn consecutive_spans_overlap_when_budget_allows() {
        let mut content = String::new();
        for i in 0..60 {
            content.push_str(&format!("let x{i} = {i};\n"));
        }
        let spans = split(&content, LanguageFamily::Rust, &cfg(40));
        assert!(spans.len() >= 2);
        assert!(spans[1].start_line <= spans[0].end_line);
    }

    #[test]
    fn does_not_split_inside_a_string_literal() {
        let content = format!(
            "let s = \"{}\";\nlet tail = 1;\n",
            "word ".repeat(200)
        );
        let spans = split(&content, LanguageFamily::Rust, &cfg(80));
        // The string literal line itself may be oversized and split
        // char-wise, but no span should start strictly inside line 1's
        // quotes while line 1 is also the end of a previous span with
        // depth still inside a string - this is a smoke test that the
        // scan completes without panicking on unbalanced quote state.
        assert!(!spans.is_empty());
    }

    #[test]
    fn blank_file_guard_does_not_infinite_loop() {
        let content = "\n".repeat(500);
        let spans = split(&content, LanguageFamily::Rust, &cfg(512));
        // All-blank content is below the trivial-chunk floor upstream;
        // here we only assert the scan terminates and yields spans.
        assert!(!spans.is_empty());
    }
}
