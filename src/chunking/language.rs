//! Language detection and per-language "good split point" patterns
//! (spec §4.1 step 3).
//!
//! Unknown extensions default to the JS family, matching spec's explicit
//! fallback rule.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Coarse language family used to pick a good-split-point pattern set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    JsLike, // JS/TS and the default fallback
    Python,
    Go,
    Rust,
    JvmLike, // Java/Kotlin/Scala
    CLike,   // C/C++
    CSharp,
    Ruby,
    Swift,
    R,
    Lua,
    Shell,
    CssLike,
    Html,
    ConfigLike, // TOML/YAML/INI/Makefile/Dockerfile
    Sql,
    Perl,
    Vim,
}

/// Detect the language family from a file path's extension (or basename,
/// for extension-less build files like `Makefile`/`Dockerfile`).
pub fn detect_family(path: &Path) -> LanguageFamily {
    let base = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if base == "makefile" || base == "dockerfile" {
        return LanguageFamily::ConfigLike;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => LanguageFamily::JsLike,
        "py" | "pyi" => LanguageFamily::Python,
        "go" => LanguageFamily::Go,
        "rs" => LanguageFamily::Rust,
        "java" | "kt" | "kts" | "scala" => LanguageFamily::JvmLike,
        "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" => LanguageFamily::CLike,
        "cs" => LanguageFamily::CSharp,
        "rb" => LanguageFamily::Ruby,
        "swift" => LanguageFamily::Swift,
        "r" => LanguageFamily::R,
        "lua" => LanguageFamily::Lua,
        "sh" | "bash" | "zsh" => LanguageFamily::Shell,
        "css" | "scss" | "sass" | "less" => LanguageFamily::CssLike,
        "html" | "htm" => LanguageFamily::Html,
        "toml" | "yaml" | "yml" | "ini" | "cfg" | "conf" => LanguageFamily::ConfigLike,
        "sql" => LanguageFamily::Sql,
        "pl" | "pm" => LanguageFamily::Perl,
        "vim" => LanguageFamily::Vim,
        _ => LanguageFamily::JsLike,
    }
}

/// Whether `line` looks like the start of a function/class/method/type
/// declaration for `family` — a "good split point" per spec §4.1 step 3.
pub fn is_good_split_point(line: &str, family: LanguageFamily) -> bool {
    let trimmed = line.trim_start();
    patterns_for(family).iter().any(|re| re.is_match(trimmed))
}

fn patterns_for(family: LanguageFamily) -> &'static [Regex] {
    static JS: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(export\s+)?(default\s+)?(async\s+)?function\b",
            r"^(export\s+)?(default\s+)?class\b",
            r"^(export\s+)?(const|let|var)\s+\w+\s*=\s*(async\s*)?\(",
            r"^(export\s+)?interface\b",
            r"^(export\s+)?type\s+\w+\s*=",
        ])
    });
    static PYTHON: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[r"^(async\s+)?def\s+\w+", r"^class\s+\w+"])
    });
    static GO: Lazy<Vec<Regex>> =
        Lazy::new(|| compile(&[r"^func\b", r"^type\s+\w+\s+(struct|interface)\b"]));
    static RUST: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(pub(\(\w+\))?\s+)?(async\s+)?fn\b",
            r"^(pub(\(\w+\))?\s+)?struct\b",
            r"^(pub(\(\w+\))?\s+)?enum\b",
            r"^(pub(\(\w+\))?\s+)?trait\b",
            r"^impl\b",
            r"^(pub(\(\w+\))?\s+)?mod\b",
        ])
    });
    static JVM: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(public|private|protected)?\s*(static\s+)?(final\s+)?(class|interface|enum)\b",
            r"^(public|private|protected)?\s*(static\s+)?(final\s+)?[\w<>\[\],\s]+\s+\w+\s*\(",
            r"^fun\s+\w+",
            r"^def\s+\w+",
        ])
    });
    static CLIKE: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(static\s+)?(inline\s+)?[\w:<>\*&\s]+\s+\w+\s*\([^;]*\)\s*\{?$",
            r"^(class|struct|enum|namespace)\s+\w+",
        ])
    });
    static CSHARP: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(public|private|protected|internal)?\s*(static\s+)?(async\s+)?(class|interface|struct|enum)\b",
            r"^(public|private|protected|internal)?\s*(static\s+)?(async\s+)?[\w<>\[\],\s]+\s+\w+\s*\(",
        ])
    });
    static RUBY: Lazy<Vec<Regex>> =
        Lazy::new(|| compile(&[r"^def\s+\w+", r"^class\s+\w+", r"^module\s+\w+"]));
    static SWIFT: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[
            r"^(public|private|internal|fileprivate)?\s*(static\s+)?func\s+\w+",
            r"^(public|private|internal|fileprivate)?\s*(class|struct|enum|protocol|extension)\b",
        ])
    });
    static R: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^\w+\s*(<-|=)\s*function\s*\("]));
    static LUA: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^(local\s+)?function\s+\w+"]));
    static SHELL: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^(function\s+)?\w+\s*\(\)\s*\{?"]));
    static CSS: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^[.#]?[\w-]+(\s*[,>+~]\s*[.#]?[\w-]+)*\s*\{"]));
    static HTML: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^<(div|section|article|header|footer|main|nav|body|html)\b"]));
    static CONFIG: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^\[[\w.\-]+\]", r"^[\w.\-]+:\s*$"]));
    static SQL: Lazy<Vec<Regex>> = Lazy::new(|| {
        compile(&[r"(?i)^(create|alter|drop)\s+(table|view|index|function|procedure)\b"])
    });
    static PERL: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"^sub\s+\w+"]));
    static VIM: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"(?i)^function!?\s+\w+"]));

    match family {
        LanguageFamily::JsLike => &JS,
        LanguageFamily::Python => &PYTHON,
        LanguageFamily::Go => &GO,
        LanguageFamily::Rust => &RUST,
        LanguageFamily::JvmLike => &JVM,
        LanguageFamily::CLike => &CLIKE,
        LanguageFamily::CSharp => &CSHARP,
        LanguageFamily::Ruby => &RUBY,
        LanguageFamily::Swift => &SWIFT,
        LanguageFamily::R => &R,
        LanguageFamily::Lua => &LUA,
        LanguageFamily::Shell => &SHELL,
        LanguageFamily::CssLike => &CSS,
        LanguageFamily::Html => &HTML,
        LanguageFamily::ConfigLike => &CONFIG,
        LanguageFamily::Sql => &SQL,
        LanguageFamily::Perl => &PERL,
        LanguageFamily::Vim => &VIM,
    }
}

/// Line-comment marker for `family`, if it has one.
pub fn line_comment_marker(family: LanguageFamily) -> Option<&'static str> {
    match family {
        LanguageFamily::JsLike
        | LanguageFamily::Go
        | LanguageFamily::Rust
        | LanguageFamily::JvmLike
        | LanguageFamily::CLike
        | LanguageFamily::CSharp
        | LanguageFamily::Swift
        | LanguageFamily::Sql => Some("//"),
        LanguageFamily::Python | LanguageFamily::Ruby | LanguageFamily::Shell | LanguageFamily::R => {
            Some("#")
        }
        LanguageFamily::ConfigLike => Some("#"),
        LanguageFamily::Lua => Some("--"),
        LanguageFamily::Perl => Some("#"),
        LanguageFamily::Vim => Some("\""),
        LanguageFamily::CssLike | LanguageFamily::Html => None,
    }
}

/// Block-comment delimiters for `family`, if it has them.
pub fn block_comment_delims(family: LanguageFamily) -> Option<(&'static str, &'static str)> {
    match family {
        LanguageFamily::JsLike
        | LanguageFamily::Go
        | LanguageFamily::Rust
        | LanguageFamily::JvmLike
        | LanguageFamily::CLike
        | LanguageFamily::CSharp
        | LanguageFamily::CssLike
        | LanguageFamily::Sql => Some(("/*", "*/")),
        LanguageFamily::Html => Some(("<!--", "-->")),
        _ => None,
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}
