//! SQLite-backed embedding store (spec §4.3).
//!
//! `rusqlite::Connection` is not `Send`, so it is wrapped in
//! `Arc<Mutex<_>>` and every operation runs on a blocking task. Chunk
//! records are append-only in steady state; `remove_file_chunks` compacts
//! the `idx` column afterward so reads stay densely indexed.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use tokio::task::spawn_blocking;

use crate::error::EngineError;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::ChunkRef;
use crate::types::LoadedChunk;
use crate::types::StoreMetadata;
use crate::types::VectorMissing;
use crate::types::CURRENT_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    idx INTEGER PRIMARY KEY,
    file TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content TEXT NOT NULL,
    vector BLOB NOT NULL,
    token_count INTEGER
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file);

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Append-only chunk + vector store for one workspace cache.
pub struct EmbeddingStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl EmbeddingStore {
    /// Open (creating if absent) the store at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let path_buf = path.to_path_buf();
        let path_for_blocking = path_buf.clone();
        let conn = spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path_for_blocking).map_err(|e| EngineError::Sqlite {
                path: path_for_blocking.clone(),
                cause: e.to_string(),
            })?;
            conn.execute_batch(SCHEMA).map_err(|e| EngineError::Sqlite {
                path: path_for_blocking.clone(),
                cause: format!("schema init failed: {e}"),
            })?;
            Ok(conn)
        })
        .await
        .map_err(|e| EngineError::Io {
            cause: format!("spawn_blocking failed: {e}"),
        })??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "embedding store mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::Io {
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Number of stored chunks.
    pub async fn length(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;
            Ok(n as usize)
        })
        .await
    }

    /// Fetch a fully materialized chunk at `index`.
    pub async fn get_record(&self, index: usize) -> Result<Option<LoadedChunk>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT idx, file, start_line, end_line, content, vector FROM chunks WHERE idx = ?1",
                    params![index as i64],
                    |row| {
                        let idx: i64 = row.get(0)?;
                        let file: String = row.get(1)?;
                        let start_line: i64 = row.get(2)?;
                        let end_line: i64 = row.get(3)?;
                        let content: String = row.get(4)?;
                        let vector_bytes: Vec<u8> = row.get(5)?;
                        Ok((idx, file, start_line, end_line, content, vector_bytes))
                    },
                )
                .optional()
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;

            Ok(row.map(|(idx, file, start_line, end_line, content, vector_bytes)| LoadedChunk {
                index: idx as usize,
                file,
                start_line: start_line as u32,
                end_line: end_line as u32,
                content,
                vector: bytes_to_vector(&vector_bytes),
            }))
        })
        .await
    }

    /// Fetch just the vector at `index`. `Err(VectorMissing)`-shaped result
    /// is represented as `Ok(None)`: a short/absent vector degrades rather
    /// than fails (spec §4.3 "Dimension guard").
    pub async fn get_vector(&self, index: usize, dim: usize) -> Result<std::result::Result<Vec<f32>, VectorMissing>> {
        self.with_conn(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector FROM chunks WHERE idx = ?1",
                    params![index as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;

            match bytes {
                None => Ok(Err(VectorMissing { index })),
                Some(bytes) if bytes.len() < dim * std::mem::size_of::<f32>() => {
                    Ok(Err(VectorMissing { index }))
                }
                Some(bytes) => Ok(Ok(bytes_to_vector(&bytes))),
            }
        })
        .await
    }

    /// Fetch just the content string at `index`.
    pub async fn get_content(&self, index: usize) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            let content: Option<String> = conn
                .query_row(
                    "SELECT content FROM chunks WHERE idx = ?1",
                    params![index as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;
            Ok(content)
        })
        .await
    }

    /// Ordered stream of lightweight references, optionally hydrated with
    /// content/vector (spec §4.3 `iterate`).
    pub async fn iterate(&self, include_content: bool, include_vector: bool) -> Result<Vec<LoadedChunk>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT idx, file, start_line, end_line, content, vector FROM chunks ORDER BY idx")
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;
            let rows = stmt
                .query_map([], |row| {
                    let idx: i64 = row.get(0)?;
                    let file: String = row.get(1)?;
                    let start_line: i64 = row.get(2)?;
                    let end_line: i64 = row.get(3)?;
                    let content: String = row.get(4)?;
                    let vector_bytes: Vec<u8> = row.get(5)?;
                    Ok((idx, file, start_line, end_line, content, vector_bytes))
                })
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;

            let mut out = Vec::new();
            for row in rows {
                let (idx, file, start_line, end_line, content, vector_bytes) =
                    row.map_err(|e| EngineError::Sqlite {
                        path: PathBuf::new(),
                        cause: e.to_string(),
                    })?;
                out.push(LoadedChunk {
                    index: idx as usize,
                    file,
                    start_line: start_line as u32,
                    end_line: end_line as u32,
                    content: if include_content { content } else { String::new() },
                    vector: if include_vector {
                        bytes_to_vector(&vector_bytes)
                    } else {
                        Vec::new()
                    },
                });
            }
            Ok(out)
        })
        .await
    }

    /// Lightweight refs only (file/line span, no content/vector).
    pub async fn iterate_refs(&self) -> Result<Vec<ChunkRef>> {
        let loaded = self.iterate(false, false).await?;
        Ok(loaded
            .into_iter()
            .map(|c| ChunkRef {
                index: c.index,
                file: c.file,
                start_line: c.start_line,
                end_line: c.end_line,
            })
            .collect())
    }

    /// Remove every chunk belonging to `file`, then compact `idx` so the
    /// remaining records stay densely numbered from 0 (spec §4.3
    /// "index compaction may renumber remaining records").
    pub async fn remove_file_chunks(&self, file: &str) -> Result<usize> {
        let file = file.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
            let removed = tx
                .execute("DELETE FROM chunks WHERE file = ?1", params![file])
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;

            if removed > 0 {
                compact_indices(&tx)?;
            }

            tx.commit().map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
            Ok(removed)
        })
        .await
    }

    /// Append `chunks`, failing the whole batch if any vector's length
    /// disagrees with the store's established `dim` (spec §4.3 "Dimension
    /// guard").
    pub async fn append_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let dim = chunks[0].vector.len();
        for chunk in &chunks {
            if chunk.vector.len() != dim {
                return Err(EngineError::DimensionMismatch {
                    expected: dim,
                    actual: chunk.vector.len(),
                });
            }
        }

        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
            let mut next_idx: i64 = tx
                .query_row("SELECT COALESCE(MAX(idx) + 1, 0) FROM chunks", [], |row| row.get(0))
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO chunks (idx, file, start_line, end_line, content, vector, token_count)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )
                    .map_err(|e| EngineError::Sqlite {
                        path: PathBuf::new(),
                        cause: e.to_string(),
                    })?;

                for chunk in &chunks {
                    stmt.execute(params![
                        next_idx,
                        chunk.file,
                        chunk.start_line,
                        chunk.end_line,
                        chunk.content,
                        vector_to_bytes(&chunk.vector),
                        chunk.token_count,
                    ])
                    .map_err(|e| EngineError::Sqlite {
                        path: PathBuf::new(),
                        cause: e.to_string(),
                    })?;
                    next_idx += 1;
                }
            }

            tx.commit().map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    /// Drop every stored chunk.
    pub async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chunks", []).map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    /// Read the store's metadata row, if present.
    pub async fn read_metadata(&self) -> Result<Option<StoreMetadata>> {
        self.with_conn(|conn| {
            let get = |key: &str| -> rusqlite::Result<Option<String>> {
                conn.query_row(
                    "SELECT value FROM store_meta WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
            };

            let version = get("version").map_err(meta_err)?;
            let Some(version) = version else { return Ok(None) };
            let model = get("embedding_model").map_err(meta_err)?.unwrap_or_default();
            let dim = get("dim").map_err(meta_err)?.unwrap_or_default();
            let count = get("count").map_err(meta_err)?.unwrap_or_default();
            let created_at = get("created_at").map_err(meta_err)?.unwrap_or_default();

            Ok(Some(StoreMetadata {
                version: version.parse().unwrap_or(0),
                embedding_model: model,
                dim: dim.parse().unwrap_or(0),
                count: count.parse().unwrap_or(0),
                created_at: created_at.parse().unwrap_or(0),
            }))
        })
        .await
    }

    /// Write the store's metadata row.
    pub async fn write_metadata(&self, meta: StoreMetadata) -> Result<()> {
        self.with_conn(move |conn| {
            let rows = [
                ("version", meta.version.to_string()),
                ("embedding_model", meta.embedding_model.clone()),
                ("dim", meta.dim.to_string()),
                ("count", meta.count.to_string()),
                ("created_at", meta.created_at.to_string()),
            ];
            for (key, value) in rows {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
                .map_err(|e| EngineError::Sqlite {
                    path: PathBuf::new(),
                    cause: e.to_string(),
                })?;
            }
            Ok(())
        })
        .await
    }

    /// Whether a stored metadata row's version matches [`CURRENT_VERSION`];
    /// a mismatch means "no store" to the caller (spec §4.3 "On open").
    pub fn version_is_current(meta: &StoreMetadata) -> bool {
        meta.version == CURRENT_VERSION
    }
}

fn compact_indices(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let ids: Vec<i64> = {
        let mut stmt = tx
            .prepare("SELECT idx FROM chunks ORDER BY idx")
            .map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| EngineError::Sqlite {
                path: PathBuf::new(),
                cause: e.to_string(),
            })?
    };

    // Shift into a disjoint high range first so intermediate renumbering
    // can't collide with the primary key's UNIQUE constraint.
    let offset = ids.len() as i64 + 1;
    for old_idx in &ids {
        tx.execute(
            "UPDATE chunks SET idx = ?1 WHERE idx = ?2",
            params![old_idx + offset * 2, old_idx],
        )
        .map_err(|e| EngineError::Sqlite {
            path: PathBuf::new(),
            cause: e.to_string(),
        })?;
    }
    let shifted: Vec<i64> = ids.iter().map(|id| id + offset * 2).collect();
    for (new_idx, shifted_idx) in shifted.iter().enumerate() {
        tx.execute(
            "UPDATE chunks SET idx = ?1 WHERE idx = ?2",
            params![new_idx as i64, shifted_idx],
        )
        .map_err(|e| EngineError::Sqlite {
            path: PathBuf::new(),
            cause: e.to_string(),
        })?;
    }
    Ok(())
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| {
            let arr: [u8; 4] = [c[0], c[1], c[2], c[3]];
            f32::from_le_bytes(arr)
        })
        .collect()
}

fn meta_err(e: rusqlite::Error) -> EngineError {
    EngineError::Sqlite {
        path: PathBuf::new(),
        cause: e.to_string(),
    }
}
