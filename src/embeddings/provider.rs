//! The thin interface the searcher calls through to embed a query (spec §6
//! "Embedding model (external)") — the model itself is owned by the
//! indexer process or a dedicated embedding child process, never by this
//! crate.
//!
//! Grounded on `codex-rs/retrieval/src/embeddings/openai.rs`'s
//! `#[async_trait] EmbeddingProvider` shape (`dimension()` + `embed()` +
//! batch variant); the child-process transport itself has no teacher
//! analogue and is built directly from spec §6's documented wire format.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::EngineError;
use crate::error::Result;

/// A provider of text embeddings. Implementors must return a vector whose
/// length equals `dimension()` for every call.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Default batch implementation embeds sequentially; providers able to
    /// batch natively (e.g. the child-process transport) should override
    /// this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    #[serde(rename = "embeddingModel")]
    embedding_model: &'a str,
    chunks: &'a [String],
    #[serde(rename = "numThreads")]
    num_threads: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    results: Vec<Vec<f32>>,
}

/// Invokes an external embedding process once per call: writes a single
/// newline-delimited JSON request to its stdin, reads one newline-
/// delimited JSON response from its stdout, and always tears the child
/// down afterward (spec §6 "caller must always invoke `dispose` ... on all
/// exit paths" — there is no tensor handle in this transport, so the
/// child process itself is the resource disposed).
pub struct ChildProcessEmbeddingProvider {
    program: String,
    args: Vec<String>,
    model: String,
    dim: usize,
    num_threads: usize,
}

impl ChildProcessEmbeddingProvider {
    pub fn new(program: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model: model.into(),
            dim,
            num_threads: 1,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    async fn request(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Embedding {
                cause: format!("spawning embedding process: {e}"),
            })?;

        let result = self.run_request(&mut child, chunks).await;

        // Dispose the child on every exit path, success or failure.
        let _ = child.start_kill();
        let _ = child.wait().await;

        result
    }

    async fn run_request(&self, child: &mut tokio::process::Child, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            embedding_model: &self.model,
            chunks,
            num_threads: self.num_threads,
        };
        let mut line = serde_json::to_string(&request).map_err(|e| EngineError::Embedding {
            cause: format!("encoding embedding request: {e}"),
        })?;
        line.push('\n');

        let mut stdin = child.stdin.take().ok_or_else(|| EngineError::Embedding {
            cause: "embedding process has no stdin".to_string(),
        })?;
        stdin.write_all(line.as_bytes()).await.map_err(|e| EngineError::Embedding {
            cause: format!("writing embedding request: {e}"),
        })?;
        stdin.flush().await.map_err(|e| EngineError::Embedding {
            cause: format!("flushing embedding request: {e}"),
        })?;
        drop(stdin);

        let mut stdout = child.stdout.take().ok_or_else(|| EngineError::Embedding {
            cause: "embedding process has no stdout".to_string(),
        })?;
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.map_err(|e| EngineError::Embedding {
            cause: format!("reading embedding response: {e}"),
        })?;

        let response_line = buf.lines().next().unwrap_or("");
        let response: EmbedResponse = serde_json::from_str(response_line).map_err(|e| EngineError::Embedding {
            cause: format!("decoding embedding response: {e}"),
        })?;

        for vector in &response.results {
            if vector.len() != self.dim {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                });
            }
        }

        Ok(response.results)
    }
}

#[async_trait]
impl EmbeddingProvider for ChildProcessEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.request(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| EngineError::Embedding {
            cause: "embedding process returned no results".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request(texts).await
    }
}

/// Truncate a vector to `dim` components (if smaller than its native
/// length) and renormalize to unit length (spec §4.7 step 2: "If the
/// configured `embeddingDimension` is smaller than the model's native
/// dimension, truncate and renormalize").
pub fn truncate_and_renormalize(vector: &[f32], dim: Option<usize>) -> Vec<f32> {
    let mut truncated = match dim {
        Some(dim) if dim < vector.len() => vector[..dim].to_vec(),
        _ => vector.to_vec(),
    };
    let norm: f32 = truncated.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut truncated {
            *v /= norm;
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_and_renormalize_shrinks_and_unit_norms() {
        let v = vec![3.0, 4.0, 0.0, 0.0];
        let out = truncate_and_renormalize(&v, Some(2));
        assert_eq!(out.len(), 2);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn truncate_and_renormalize_is_a_no_op_without_a_configured_dim() {
        let v = vec![1.0, 0.0, 0.0];
        let out = truncate_and_renormalize(&v, None);
        assert_eq!(out, v);
    }

    #[test]
    fn truncate_and_renormalize_handles_the_zero_vector() {
        let v = vec![0.0, 0.0, 0.0];
        let out = truncate_and_renormalize(&v, Some(2));
        assert_eq!(out, vec![0.0, 0.0]);
    }
}
