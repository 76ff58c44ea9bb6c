//! Call-graph side index: inverted `defines`/`calledBy`/`fileCalls` maps
//! and the bounded-hop related-files query (spec §4.5).

use std::collections::HashMap;
use std::collections::HashSet;

use crate::types::FileCallData;

/// Built once per invalidation from the store's `{ file -> FileCallData }`
/// map, then reused until the next mutation (spec §4.5 "Build policy").
#[derive(Debug, Clone, Default)]
pub struct CallGraphIndex {
    defines: HashMap<String, Vec<String>>,
    called_by: HashMap<String, Vec<String>>,
    file_calls: HashMap<String, Vec<String>>,
}

impl CallGraphIndex {
    /// Build the three inverted maps from per-file call data.
    pub fn build(per_file: &HashMap<String, FileCallData>) -> Self {
        let mut defines: HashMap<String, Vec<String>> = HashMap::new();
        let mut called_by: HashMap<String, Vec<String>> = HashMap::new();
        let mut file_calls: HashMap<String, Vec<String>> = HashMap::new();

        for (file, data) in per_file {
            for symbol in &data.definitions {
                defines.entry(symbol.clone()).or_default().push(file.clone());
            }
            for symbol in &data.calls {
                called_by.entry(symbol.clone()).or_default().push(file.clone());
            }
            file_calls.insert(file.clone(), data.calls.iter().cloned().collect());
        }

        Self {
            defines,
            called_by,
            file_calls,
        }
    }

    pub fn defines(&self) -> &HashMap<String, Vec<String>> {
        &self.defines
    }

    pub fn called_by(&self) -> &HashMap<String, Vec<String>> {
        &self.called_by
    }

    pub fn file_calls(&self) -> &HashMap<String, Vec<String>> {
        &self.file_calls
    }

    /// `related(symbols, maxHops)` → `{ file → score }` (spec §4.5).
    ///
    /// Hop 0: files that define or call any seed symbol score 1. Each
    /// further hop visits the defining/calling files of the current symbol
    /// frontier once, then advances the frontier along `fileCalls`. A
    /// file's final score is the max across every hop it was seen at.
    pub fn related(&self, symbols: &[String], max_hops: u32) -> HashMap<String, f32> {
        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut visited_files: HashSet<String> = HashSet::new();
        let mut frontier: HashSet<String> = symbols.iter().cloned().collect();
        let mut seen_symbols: HashSet<String> = frontier.clone();

        let mut hop = 0u32;
        while hop <= max_hops && !frontier.is_empty() {
            let score = 1.0_f32 / ((hop + 1) as f32);
            let mut touched_files: HashSet<String> = HashSet::new();

            for symbol in &frontier {
                if let Some(files) = self.defines.get(symbol) {
                    for file in files {
                        touched_files.insert(file.clone());
                    }
                }
                if let Some(files) = self.called_by.get(symbol) {
                    for file in files {
                        touched_files.insert(file.clone());
                    }
                }
            }

            for file in &touched_files {
                let entry = scores.entry(file.clone()).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
                visited_files.insert(file.clone());
            }

            if hop == max_hops {
                break;
            }

            let mut next_frontier: HashSet<String> = HashSet::new();
            for file in &touched_files {
                if let Some(calls) = self.file_calls.get(file) {
                    for symbol in calls {
                        if seen_symbols.insert(symbol.clone()) {
                            next_frontier.insert(symbol.clone());
                        }
                    }
                }
            }
            frontier = next_frontier;
            hop += 1;
        }

        scores
    }

    /// Remove entries for files no longer in the store (spec §4.5
    /// "Pruning").
    pub fn prune_removed_files(per_file: &mut HashMap<String, FileCallData>, live_files: &HashSet<String>) {
        per_file.retain(|file, _| live_files.contains(file));
    }
}
