//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, via [`Config::default`]) gives an in-memory index over the local
//! `bge-large-en-v1.5` model with 1000/200 chunking and top-5 search.

use anyhow::{Context, Result};
use petcare_core::chunk::ChunkParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    /// Directory holding the index snapshot. `None` keeps the index in memory.
    #[serde(default)]
    pub persist_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    petcare_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    petcare_core::chunk::DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Consult web search when local retrieval returns fewer hits than this.
    #[serde(default = "default_web_fallback_threshold")]
    pub web_fallback_threshold: usize,
    #[serde(default = "default_web_max_results")]
    pub web_max_results: usize,
    /// How many web snippets make it into the answer context.
    #[serde(default = "default_web_context_limit")]
    pub web_context_limit: usize,
    /// Skip documents whose source ID is already indexed instead of re-ingesting.
    #[serde(default)]
    pub skip_processed: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            web_fallback_threshold: default_web_fallback_threshold(),
            web_max_results: default_web_max_results(),
            web_context_limit: default_web_context_limit(),
            skip_processed: false,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_web_fallback_threshold() -> usize {
    2
}
fn default_web_max_results() -> usize {
    5
}
fn default_web_context_limit() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"` (fastembed) or `"hash"` (deterministic, offline).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KnowledgeConfig {
    /// Directory ingested at startup. `None` disables the bootstrap.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        self.chunking
            .params()
            .validate()
            .context("invalid [chunking] section")?;

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "local" => {}
            "hash" => {
                if self.embedding.dims == Some(0) {
                    anyhow::bail!("embedding.dims must be > 0 when provider is 'hash'");
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be local or hash.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
