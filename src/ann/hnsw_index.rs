//! Thin wrapper over `hnsw_rs`'s graph for one fixed metric (spec §4.4).
//!
//! `codex-rs/retrieval` has no standalone ANN index of its own (it
//! delegates to its vector database's built-in index), so this module's
//! shape is grounded on `other_examples/`'s `VectorIndex`-style wrappers
//! instead.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use hnsw_rs::dist::DistCosine;
use hnsw_rs::dist::DistDot;
use hnsw_rs::dist::DistL2;
use hnsw_rs::hnsw::Hnsw;

use crate::config::Metric;
use crate::error::EngineError;
use crate::error::Result;

const MAX_LAYER: usize = 16;

enum Graph {
    Cosine(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
    Ip(Hnsw<'static, f32, DistDot>),
}

/// A built HNSW graph over unit-norm vectors, plus the stats the contract
/// in spec §4.4 exposes via `stats()`.
///
/// `ef_search` is atomic rather than a plain field: the graph is shared via
/// `Arc` across reader snapshots once published (spec §4.6), and
/// `setEfSearch` must "take effect immediately" for every holder of that
/// `Arc`, not just a `&mut` owner.
pub struct HnswIndex {
    graph: Graph,
    metric: Metric,
    m: usize,
    ef_construction: usize,
    ef_search: AtomicUsize,
    dim: usize,
    count: usize,
}

/// Snapshot returned by `HnswIndex::stats()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnStats {
    pub dim: usize,
    pub count: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl HnswIndex {
    /// Build a fresh graph over `vectors` (chunk-index, vector) pairs, in
    /// store order (spec §4.4 "Rebuild streams every stored vector through
    /// the graph `addPoint` in index order").
    pub fn build(
        vectors: &[(usize, Vec<f32>)],
        metric: Metric,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
        dim: usize,
    ) -> Result<Self> {
        let capacity = vectors.len().max(1);
        let graph = match metric {
            Metric::Cosine => Graph::Cosine(Hnsw::new(m, capacity, MAX_LAYER, ef_construction, DistCosine {})),
            Metric::L2 => Graph::L2(Hnsw::new(m, capacity, MAX_LAYER, ef_construction, DistL2 {})),
            Metric::Ip => Graph::Ip(Hnsw::new(m, capacity, MAX_LAYER, ef_construction, DistDot {})),
        };

        let mut index = Self {
            graph,
            metric,
            m,
            ef_construction,
            ef_search: AtomicUsize::new(ef_search),
            dim,
            count: 0,
        };
        for (id, vector) in vectors {
            index.insert(*id, vector)?;
        }
        Ok(index)
    }

    fn insert(&mut self, id: usize, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        match &self.graph {
            Graph::Cosine(h) => h.insert((vector, id)),
            Graph::L2(h) => h.insert((vector, id)),
            Graph::Ip(h) => h.insert((vector, id)),
        }
        self.count += 1;
        Ok(())
    }

    /// Takes effect immediately for every holder of this graph, including
    /// ones that cloned an `Arc` of it before this call (spec §4.4
    /// `setEfSearch`).
    pub fn set_ef_search(&self, value: usize) {
        self.ef_search.store(value, Ordering::Relaxed);
    }

    /// Ordered (ascending distance) candidate indices for `vector`.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<usize> {
        if k == 0 {
            return Vec::new();
        }
        let ef_search = self.ef_search.load(Ordering::Relaxed);
        let mut neighbours = match &self.graph {
            Graph::Cosine(h) => h.search(vector, k, ef_search),
            Graph::L2(h) => h.search(vector, k, ef_search),
            Graph::Ip(h) => h.search(vector, k, ef_search),
        };
        neighbours.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        neighbours.into_iter().map(|n| n.d_id).collect()
    }

    pub fn stats(&self) -> AnnStats {
        AnnStats {
            dim: self.dim,
            count: self.count,
            metric: self.metric,
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    #[test]
    fn query_returns_nearest_point_first() {
        let vectors = vec![
            (0, unit(1.0, 0.0)),
            (1, unit(0.0, 1.0)),
            (2, unit(0.9, 0.1)),
        ];
        let index = HnswIndex::build(&vectors, Metric::Cosine, 16, 200, 64, 2).expect("build");
        let results = index.query(&unit(1.0, 0.0), 2);
        assert_eq!(results.first(), Some(&0));
    }

    #[test]
    fn build_rejects_mismatched_dimension() {
        let vectors = vec![(0, vec![1.0, 0.0]), (1, vec![1.0, 0.0, 0.0])];
        let result = HnswIndex::build(&vectors, Metric::Cosine, 16, 200, 64, 2);
        assert!(result.is_err());
    }

    #[test]
    fn stats_reports_configured_parameters() {
        let vectors = vec![(0, unit(1.0, 0.0))];
        let index = HnswIndex::build(&vectors, Metric::L2, 8, 100, 32, 2).expect("build");
        let stats = index.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dim, 2);
        assert_eq!(stats.m, 8);
        assert_eq!(stats.ef_search, 32);
    }

    #[test]
    fn set_ef_search_updates_stats_immediately() {
        let vectors = vec![(0, unit(1.0, 0.0))];
        let mut index = HnswIndex::build(&vectors, Metric::Cosine, 16, 200, 64, 2).expect("build");
        index.set_ef_search(128);
        assert_eq!(index.stats().ef_search, 128);
    }
}
