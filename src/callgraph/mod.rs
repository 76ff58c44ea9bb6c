//! Regex-heuristic call-graph extraction and its side index (spec §4.2,
//! §4.5). No symbol-accurate parsing is attempted anywhere in this module.

pub mod extractor;
pub mod index;

pub use extractor::extract_call_data;
pub use extractor::extract_symbols;
pub use index::CallGraphIndex;
