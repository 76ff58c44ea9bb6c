//! Thin demonstration binary over `codesearch_engine`.
//!
//! Real process-level concerns — transport, host-IDE tool registration,
//! file-watcher glue, proper argument parsing for a production CLI — are
//! external collaborators this spec treats only at their interface. This
//! binary exists to exercise the library end to end: walk a workspace,
//! chunk and embed it, and run hybrid searches against the result.
//!
//! Since the embedding model itself is external to the core (spec §1
//! "treated as a pure function `text -> unit-norm float vector`"), this
//! binary either shells out to one via `--embed-cmd` (the documented
//! child-process transport, spec §6) or falls back to a small
//! deterministic hash-based stand-in so the demo runs without a real
//! model on hand.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;

use codesearch_engine::cache::ConcurrentCache;
use codesearch_engine::callgraph::extract_call_data;
use codesearch_engine::chunking::chunk_file;
use codesearch_engine::config::ChunkerConfig;
use codesearch_engine::config::EngineConfig;
use codesearch_engine::embeddings::ChildProcessEmbeddingProvider;
use codesearch_engine::embeddings::EmbeddingProvider;
use codesearch_engine::search::HybridSearcher;
use codesearch_engine::store::EmbeddingStore;
use codesearch_engine::tool_api::AnnConfigAction;
use codesearch_engine::tool_api::ToolApi;
use codesearch_engine::types::canonical_key;
use codesearch_engine::types::Chunk;
use codesearch_engine::types::FileMetadata;

const DEMO_DIM: usize = 64;

#[derive(Parser)]
#[command(name = "codesearch-cli")]
#[command(about = "Demonstration CLI over the local hybrid code-search engine")]
struct Cli {
    /// Workspace root to index/search.
    #[arg(default_value = ".")]
    workdir: PathBuf,

    /// Cache directory for persisted state (default: {workdir}/.codesearch).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Path to a TOML config file overriding engine defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// External embedding process to shell out to (newline-delimited JSON
    /// over stdio, spec §6). Omit to use the deterministic demo embedder.
    #[arg(long)]
    embed_cmd: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the workspace, chunk changed files, and (re)embed them.
    Index,
    /// Run a hybrid search and print the rendered tool response.
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print ANN index stats as JSON.
    AnnStats,
    /// Set the ANN index's `efSearch` parameter.
    SetEfSearch { value: i64 },
    /// Force a full ANN rebuild.
    RebuildAnn,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("codesearch_engine=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workdir = cli.workdir.canonicalize().unwrap_or_else(|_| cli.workdir.clone());
    let cache_dir = cli.cache_dir.clone().unwrap_or_else(|| workdir.join(".codesearch"));

    let engine_config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            EngineConfig::from_toml_str(&text)?
        }
        None => EngineConfig::default(),
    };
    engine_config.validate()?;

    let embeddings: Arc<dyn EmbeddingProvider> = match &cli.embed_cmd {
        Some(cmd) => Arc::new(ChildProcessEmbeddingProvider::new(cmd.clone(), "external", DEMO_DIM)),
        None => Arc::new(DemoHashEmbeddingProvider::new(DEMO_DIM)),
    };

    std::fs::create_dir_all(&cache_dir)?;
    let store = Arc::new(EmbeddingStore::open(&cache_dir.join("store.db")).await?);
    let cache = Arc::new(
        ConcurrentCache::open(
            cache_dir.join("index"),
            engine_config.cache.clone(),
            engine_config.ann.clone(),
            embeddings.model_name().to_string(),
            store.clone(),
        )
        .await?,
    );

    match cli.command {
        Command::Index => cmd_index(&workdir, &cache, embeddings.as_ref(), &engine_config.chunker).await?,
        Command::Search { query, limit } => cmd_search(cache, embeddings, &engine_config, &query, limit).await?,
        Command::AnnStats => {
            let api = ToolApi::new(searcher(cache.clone(), embeddings, &engine_config), cache);
            let stats = api.ann_config(AnnConfigAction::Stats).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::SetEfSearch { value } => {
            let api = ToolApi::new(searcher(cache.clone(), embeddings, &engine_config), cache);
            let result = api.ann_config(AnnConfigAction::SetEfSearch { ef_search: value }).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::RebuildAnn => {
            let api = ToolApi::new(searcher(cache.clone(), embeddings, &engine_config), cache);
            let result = api.ann_config(AnnConfigAction::Rebuild).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn searcher(cache: Arc<ConcurrentCache>, embeddings: Arc<dyn EmbeddingProvider>, config: &EngineConfig) -> Arc<HybridSearcher> {
    Arc::new(HybridSearcher::new(
        cache,
        embeddings,
        config.search.clone(),
        config.ann.clone(),
        config.call_graph.clone(),
    ))
}

async fn cmd_search(
    cache: Arc<ConcurrentCache>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: &EngineConfig,
    query: &str,
    limit: usize,
) -> anyhow::Result<()> {
    let api = ToolApi::new(searcher(cache.clone(), embeddings, config), cache);
    let response = api.semantic_search(query, Some(limit)).await;
    println!("{}", response.text);
    if response.is_error {
        anyhow::bail!("search failed");
    }
    Ok(())
}

async fn cmd_index(
    workdir: &Path,
    cache: &Arc<ConcurrentCache>,
    embeddings: &dyn EmbeddingProvider,
    chunker_config: &ChunkerConfig,
) -> anyhow::Result<()> {
    let mut indexed_files = 0usize;
    let mut indexed_chunks = 0usize;

    for path in walk_source_files(workdir) {
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue; // binary or unreadable file, skip silently (spec §7 "outside-workspace/unreadable path")
        };
        let key = canonical_key(&path);
        let hash = content_hash(&content);
        let metadata = tokio::fs::metadata(&path).await?;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        if let Some(existing) = cache.file_metadata(&key) {
            if existing.hash == hash {
                continue; // unchanged, spec §3 "re-index when content hash differs"
            }
            cache.remove_file_chunks(&key).await?;
        }

        let spans = chunk_file(&path, &content, chunker_config);
        if spans.is_empty() {
            continue;
        }

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = embeddings.embed_batch(&texts).await?;

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .zip(vectors)
            .map(|(span, vector)| Chunk {
                file: key.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                content: span.text,
                vector,
                token_count: Some(span.token_count),
            })
            .collect();
        indexed_chunks += chunks.len();
        cache.append_chunks(chunks).await?;

        let call_data = extract_call_data(&content, &path);
        cache.set_file_call_data(key.clone(), call_data);
        cache.set_file_metadata(
            key,
            FileMetadata {
                mtime_ms,
                hash,
                size: metadata.len(),
            },
        );
        indexed_files += 1;
    }

    cache.ensure_ann_built().await;
    cache.save(false).await?;
    println!("Indexed {indexed_files} changed file(s), {indexed_chunks} chunk(s).");
    Ok(())
}

fn content_hash(content: &str) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walk `root` for source files, skipping dotdirs and common vendor/build
/// directories (spec §6 "outside-workspace path ... skip the file
/// silently in non-verbose mode" informs the same posture here).
fn walk_source_files(root: &Path) -> Vec<PathBuf> {
    const SKIP_DIRS: &[&str] = &[
        ".git", ".codesearch", "node_modules", "target", "dist", "build", "vendor", ".venv", "__pycache__",
    ];
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    out
}

/// Deterministic, dependency-free stand-in for a real embedding model:
/// hashes overlapping character trigrams into `dim` buckets, then unit-
/// normalizes. Never used for anything but local demos — the real model
/// is always an external collaborator (spec §1).
struct DemoHashEmbeddingProvider {
    dim: usize,
}

impl DemoHashEmbeddingProvider {
    fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for DemoHashEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "demo-hash-embedder"
    }

    async fn embed(&self, text: &str) -> codesearch_engine::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let bytes: Vec<char> = text.to_lowercase().chars().collect();
        if bytes.len() < 3 {
            vector[0] = 1.0;
        } else {
            for window in bytes.windows(3) {
                let mut h: u64 = 1469598103934665603;
                for c in window {
                    h ^= *c as u64;
                    h = h.wrapping_mul(1099511628211);
                }
                vector[(h as usize) % self.dim] += 1.0;
            }
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            vector[0] = 1.0;
        }
        Ok(vector)
    }
}
