//! Heuristic token estimator (spec §4.1).
//!
//! This is deliberately NOT the embedding model's real tokenizer — it is a
//! fast, deterministic approximation the chunker uses to decide where to
//! split. Downstream consumers must tolerate occasional truncation by the
//! real tokenizer when this estimate undercounts (spec §4.1, §9 open
//! question).

/// Estimate the token count of a line of text.
///
/// Two tokens are reserved for sentinel tokens, then each whitespace-
/// separated word contributes `len <= 4 -> 1`, `len <= 10 -> 2`, else
/// `ceil(len / 4)`. Punctuation-heavy "words" contribute at half weight.
/// Unicode whitespace always terminates a word.
pub fn estimate_tokens(text: &str) -> u32 {
    let mut total: u32 = 2;
    for word in text.split_whitespace() {
        total += estimate_word_tokens(word);
    }
    total
}

fn estimate_word_tokens(word: &str) -> u32 {
    let len = word.chars().count();
    if len == 0 {
        return 0;
    }
    let base = if len <= 4 {
        1
    } else if len <= 10 {
        2
    } else {
        ((len as f64) / 4.0).ceil() as u32
    };
    if is_special_punctuation(word) {
        // Half weight, rounded up so a lone punctuation token never costs 0.
        ((base as f64) / 2.0).ceil() as u32
    } else {
        base
    }
}

/// A "word" that is made up entirely of punctuation/symbol characters
/// (operators, brackets, separators) rather than identifier-like text.
fn is_special_punctuation(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| !c.is_alphanumeric() && c != '_')
}
