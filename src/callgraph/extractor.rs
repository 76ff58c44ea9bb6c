//! Heuristic definition/call extraction (spec §4.2).
//!
//! Deliberately not a parser: comments and string bodies are blanked out by
//! regex replacement, language-tagged keyword patterns find definitions in
//! the untouched source, and a single generic "identifier before an open
//! paren" pattern finds calls in the blanked copy. This trades precision
//! for being cheap enough to run on every indexed file.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunking::language::detect_family;
use crate::chunking::language::LanguageFamily;
use crate::types::FileCallData;

/// Extract `{ definitions, calls }` for one file's content.
pub fn extract_call_data(content: &str, path: &Path) -> FileCallData {
    let family = detect_family(path);
    let stripped = strip_comments_and_strings(content);

    let mut definitions = BTreeSet::new();
    for pattern in definition_patterns(family) {
        for caps in pattern.captures_iter(content) {
            if let Some(name) = caps.name("name").or_else(|| caps.get(1)) {
                push_if_kept(&mut definitions, name.as_str());
            }
        }
    }

    let mut calls = BTreeSet::new();
    for caps in CALL_PATTERN.captures_iter(&stripped) {
        if let Some(name) = caps.get(1) {
            push_if_kept(&mut calls, name.as_str());
        }
    }
    // Self-reference suppression: a file calling its own definitions isn't
    // an inter-file edge.
    for def in &definitions {
        calls.remove(def);
    }

    FileCallData { definitions, calls }
}

/// The smaller pattern set used by the hybrid searcher to pull a handful of
/// symbols out of a chunk's own text for call-graph boosting (spec §4.2
/// "Symbol extraction"). Minimum length 3 to cut noise.
pub fn extract_symbols(content: &str, max: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for caps in SYMBOL_PATTERN.captures_iter(content) {
        if out.len() >= max {
            break;
        }
        if let Some(name) = caps.get(1) {
            let name = name.as_str();
            if name.chars().count() >= 3 && !DENY_LIST.contains(name) && seen.insert(name.to_string())
            {
                out.push(name.to_string());
            }
        }
    }
    out
}

fn push_if_kept(set: &mut BTreeSet<String>, name: &str) {
    if name.chars().count() > 1 && !DENY_LIST.contains(name) {
        set.insert(name.to_string());
    }
}

/// Blank out line comments, block comments, triple-quoted strings, and
/// single/double/back-tick string literals, preserving line structure so
/// byte offsets used elsewhere stay meaningful.
fn strip_comments_and_strings(content: &str) -> String {
    let mut s = TRIPLE_QUOTED.replace_all(content, blank_same_lines).to_string();
    s = BLOCK_COMMENT.replace_all(&s, blank_same_lines).to_string();
    s = LINE_COMMENT.replace_all(&s, blank_same_lines).to_string();
    s = STRING_LITERAL.replace_all(&s, blank_same_lines).to_string();
    s
}

fn blank_same_lines(caps: &regex::Captures<'_>) -> String {
    let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    matched
        .split('\n')
        .map(|line| " ".repeat(line.chars().count()))
        .collect::<Vec<_>>()
        .join("\n")
}

static TRIPLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| must_compile(r#"(?s)'''.*?'''|""".*?""""#));
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| must_compile(r"(?s)/\*.*?\*/"));
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| must_compile(r"(?m)(//|#)[^\n]*"));
static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| must_compile(r#"(?m)"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\.)*`"#));

static CALL_PATTERN: Lazy<Regex> = Lazy::new(|| must_compile(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\("));
static SYMBOL_PATTERN: Lazy<Regex> = Lazy::new(|| must_compile(r"\b([A-Za-z_][A-Za-z0-9_]*)\b"));

fn must_compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        // These patterns are fixed at compile time; a failure here is a bug
        // in this module, not a runtime condition callers can handle.
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

/// Control-flow keywords, common method names, and other noise that would
/// otherwise dominate `definitions`/`calls` sets (spec §4.2).
static DENY_LIST: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "if", "else", "for", "while", "switch", "case", "do", "try", "catch", "finally",
        "return", "break", "continue", "throw", "yield", "await", "async", "function",
        "new", "delete", "typeof", "instanceof", "in", "of", "let", "const", "var",
        "class", "extends", "implements", "interface", "struct", "enum", "impl", "trait",
        "fn", "def", "pub", "mod", "use", "import", "export", "from", "as", "match",
        "loop", "unsafe", "mut", "ref", "self", "super", "this", "true", "false", "null",
        "nil", "none", "void", "print", "println", "printf", "log", "test", "describe",
        "it", "expect", "assert", "assert_eq", "assert_ne", "beforeeach", "aftereach",
        "setup", "teardown", "main", "len", "push", "pop", "map", "filter", "reduce",
        "foreach", "join", "split", "slice", "concat", "sort", "clone", "to_string",
        "tostring", "unwrap", "ok", "err", "some", "require", "module",
    ]
    .into_iter()
    .collect()
});

fn definition_patterns(family: LanguageFamily) -> &'static [Regex] {
    static JS: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?class\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\(",
        ])
    });
    static PYTHON: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"(?m)^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
            r"(?m)^\s*class\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
        ])
    });
    static GO: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"(?m)^\s*func\s+(?:\([^)]*\)\s*)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
            r"(?m)^\s*type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+(?:struct|interface)\b",
        ])
    });
    static RUST: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
        ])
    });
    static JAVA: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:class|interface|enum)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
            r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?[\w<>\[\],\s]+\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*\([^;]*\)\s*\{",
        ])
    });
    static OTHER: Lazy<Vec<Regex>> = Lazy::new(Vec::new);

    match family {
        LanguageFamily::JsLike => &JS,
        LanguageFamily::Python => &PYTHON,
        LanguageFamily::Go => &GO,
        LanguageFamily::Rust => &RUST,
        LanguageFamily::JvmLike => &JAVA,
        _ => &OTHER,
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| must_compile(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_rust_function_definitions() {
        let content = "pub fn handle_request(x: i32) -> i32 {\n    validate(x)\n}\n";
        let data = extract_call_data(content, &PathBuf::from("a.rs"));
        assert!(data.definitions.contains("handle_request"));
        assert!(data.calls.contains("validate"));
    }

    #[test]
    fn self_reference_is_suppressed() {
        let content = "pub fn helper() {\n    helper();\n}\n";
        let data = extract_call_data(content, &PathBuf::from("a.rs"));
        assert!(data.definitions.contains("helper"));
        assert!(!data.calls.contains("helper"));
    }

    #[test]
    fn calls_inside_string_literals_are_ignored() {
        let content = "pub fn a() {\n    let s = \"not_a_call(1)\";\n}\n";
        let data = extract_call_data(content, &PathBuf::from("a.rs"));
        assert!(!data.calls.contains("not_a_call"));
    }

    #[test]
    fn calls_inside_line_comments_are_ignored() {
        let content = "pub fn a() {\n    // looks_like_call(1)\n}\n";
        let data = extract_call_data(content, &PathBuf::from("a.rs"));
        assert!(!data.calls.contains("looks_like_call"));
    }

    #[test]
    fn deny_listed_keywords_never_become_definitions_or_calls() {
        let content = "def main():\n    if True:\n        print(1)\n";
        let data = extract_call_data(content, &PathBuf::from("a.py"));
        assert!(!data.definitions.contains("if"));
        assert!(!data.calls.contains("print"));
    }

    #[test]
    fn single_character_names_are_dropped() {
        let content = "function f() {\n    g();\n}\n";
        let data = extract_call_data(content, &PathBuf::from("a.js"));
        assert!(!data.definitions.contains("f"));
        assert!(!data.calls.contains("g"));
    }

    #[test]
    fn extract_symbols_respects_min_length_and_cap() {
        let content = "fn process_order(order: Order) { validate(order); }";
        let symbols = extract_symbols(content, 2);
        assert!(symbols.len() <= 2);
        assert!(symbols.iter().all(|s| s.chars().count() >= 3));
    }

    #[test]
    fn extraction_is_deterministic_across_repeated_calls() {
        let content = "pub fn outer() {\n    inner();\n    helper(1);\n}\n\nfn inner() {}\n";
        let path = PathBuf::from("a.rs");
        let first = extract_call_data(content, &path);
        let second = extract_call_data(content, &path);
        assert_eq!(first, second);
    }
}
