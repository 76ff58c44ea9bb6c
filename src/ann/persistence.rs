//! ANN graph persistence: a binary snapshot of the indexed vectors plus a
//! JSON sidecar of [`AnnMetadata`] (spec §4.4).
//!
//! Rather than depend on `hnsw_rs`'s own on-disk graph format, the binary
//! file stores the `(index, vector)` pairs the graph was built from; on
//! load the graph is rebuilt from that snapshot. This keeps the format
//! entirely owned by this crate and symmetric with the embedding store's
//! temp-then-rename write path (spec §4.3).

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::store::persistence::atomic_write;
use crate::types::AnnMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedGraph {
    vectors: Vec<(usize, Vec<f32>)>,
}

fn graph_path(workspace_cache_dir: &Path) -> PathBuf {
    workspace_cache_dir.join("ann_graph.bin")
}

fn sidecar_path(workspace_cache_dir: &Path) -> PathBuf {
    workspace_cache_dir.join("ann_graph.meta.json")
}

/// Persist `vectors` and `metadata` under the workspace lock (spec §4.4
/// "the writer persists the binary graph and its sidecar metadata ...
/// using a temp-then-rename ... strategy symmetric with 4.3").
pub async fn save(workspace_cache_dir: &Path, vectors: &[(usize, Vec<f32>)], metadata: &AnnMetadata) -> Result<()> {
    let graph = PersistedGraph {
        vectors: vectors.to_vec(),
    };
    let graph_bytes = bincode::serialize(&graph).map_err(|e| EngineError::Corrupt {
        detail: format!("encoding ann graph: {e}"),
    })?;
    let meta_bytes = serde_json::to_vec_pretty(metadata).map_err(|e| EngineError::Corrupt {
        detail: format!("encoding ann metadata: {e}"),
    })?;

    atomic_write(&graph_path(workspace_cache_dir), &graph_bytes).await?;
    atomic_write(&sidecar_path(workspace_cache_dir), &meta_bytes).await?;
    Ok(())
}

/// Load a persisted graph and its metadata, retrying the read once before
/// the caller should treat it as absent (spec §4.4 "`readIndexSync` is
/// retried once before rebuild").
pub async fn load(workspace_cache_dir: &Path) -> Result<Option<(Vec<(usize, Vec<f32>)>, AnnMetadata)>> {
    match try_load(workspace_cache_dir).await {
        Ok(loaded) => Ok(loaded),
        Err(_) => try_load(workspace_cache_dir).await,
    }
}

async fn try_load(workspace_cache_dir: &Path) -> Result<Option<(Vec<(usize, Vec<f32>)>, AnnMetadata)>> {
    let graph_path = graph_path(workspace_cache_dir);
    let sidecar_path = sidecar_path(workspace_cache_dir);

    if !graph_path.exists() || !sidecar_path.exists() {
        return Ok(None);
    }

    let graph_bytes = tokio::fs::read(&graph_path).await?;
    let meta_bytes = tokio::fs::read(&sidecar_path).await?;

    let graph: PersistedGraph = bincode::deserialize(&graph_bytes).map_err(|e| EngineError::Corrupt {
        detail: format!("decoding ann graph: {e}"),
    })?;
    let metadata: AnnMetadata = serde_json::from_slice(&meta_bytes).map_err(|e| EngineError::Corrupt {
        detail: format!("decoding ann metadata: {e}"),
    })?;

    Ok(Some((graph.vectors, metadata)))
}

/// Whether a loaded sidecar agrees with the live store (spec §4.4 "On read
/// ... version, model, dim, count must all match").
pub fn metadata_matches(loaded: &AnnMetadata, current: &AnnMetadata) -> bool {
    loaded.version == current.version
        && loaded.embedding_model == current.embedding_model
        && loaded.dim == current.dim
        && loaded.count == current.count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use tempfile::TempDir;

    fn meta() -> AnnMetadata {
        AnnMetadata {
            version: crate::types::CURRENT_VERSION,
            embedding_model: "test-model".to_string(),
            dim: 2,
            count: 2,
            metric: Metric::Cosine,
            m: 16,
            ef_construction: 200,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let vectors = vec![(0, vec![1.0, 0.0]), (1, vec![0.0, 1.0])];
        save(dir.path(), &vectors, &meta()).await.expect("save");

        let (loaded_vectors, loaded_meta) = load(dir.path()).await.expect("load").expect("present");
        assert_eq!(loaded_vectors, vectors);
        assert_eq!(loaded_meta, meta());
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = TempDir::new().expect("tempdir");
        let result = load(dir.path()).await.expect("load");
        assert!(result.is_none());
    }

    #[test]
    fn metadata_matches_detects_dim_mismatch() {
        let mut other = meta();
        other.dim = 4;
        assert!(!metadata_matches(&other, &meta()));
    }

    #[test]
    fn metadata_matches_accepts_identical_metadata() {
        assert!(metadata_matches(&meta(), &meta()));
    }
}
