//! Embedding provider construction.
//!
//! Builds the session's [`Embedder`] from configuration:
//! - **`"local"`**: [`FastEmbedder`], a sentence-embedding model run
//!   locally through fastembed (behind the `local-embeddings-fastembed`
//!   feature). The model is downloaded on first use and cached; after that
//!   no network calls are made.
//! - **`"hash"`**: [`HashEmbedder`], deterministic and offline.
//!
//! Construction failures are [`Error::ModelInit`] and fatal to the session.
//! Nothing here retries: embedding is local and side-effect free.

use std::sync::Arc;

use petcare_core::embedding::{Embedder, HashEmbedder};
use petcare_core::{Error, Result};

use crate::config::EmbeddingConfig;

/// Default model for the `"local"` provider (BAAI/bge-large-en-v1.5).
pub const DEFAULT_LOCAL_MODEL: &str = "bge-large-en-v1.5";
/// Default dimension for the `"hash"` provider.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Create the embedder selected by `config.provider`.
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        )?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(FastEmbedder::new(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::ModelInit(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(Error::ModelInit(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Resolve the local model name and its output dimension.
///
/// An explicit `embedding.dims` that disagrees with the model is rejected
/// rather than silently producing vectors of the wrong size.
pub fn resolve_local_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let known_dims = match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        other => {
            return Err(Error::ModelInit(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            )))
        }
    };

    match config.dims {
        Some(dims) if dims != known_dims => Err(Error::ModelInit(format!(
            "embedding.dims = {} but model '{}' produces {} dimensions",
            dims, model_name, known_dims
        ))),
        _ => Ok((model_name, known_dims)),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use petcare_core::embedding::{validate_batch_output, Embedder};
    use petcare_core::{Error, Result};
    use tracing::info;

    use super::resolve_local_model;
    use crate::config::EmbeddingConfig;

    fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => Err(Error::ModelInit(format!(
                "Unknown local embedding model: '{}'",
                other
            ))),
        }
    }

    /// Sentence-embedding model loaded once per session.
    ///
    /// Inference runs on the blocking pool; the model sits behind a mutex
    /// because fastembed needs exclusive access per call.
    pub struct FastEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl FastEmbedder {
        pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
            let (model_name, dims) = resolve_local_model(config)?;
            let fastembed_model = config_to_fastembed_model(&model_name)?;

            info!(model = %model_name, dims, "Loading local embedding model");
            let model = tokio::task::spawn_blocking(move || {
                fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
            })
            .await
            .map_err(|e| Error::ModelInit(e.to_string()))?
            .map_err(|e| Error::ModelInit(e.to_string()))?;

            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = Arc::clone(&self.model);
            let input = texts.to_vec();
            let batch_size = self.batch_size;
            let result = tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| "embedding model lock poisoned".to_string())?;
                guard
                    .embed(input, Some(batch_size))
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| e.to_string())
            .and_then(|inner| inner);

            let vectors = result.map_err(|message| Error::Embedding {
                batch: texts.to_vec(),
                message,
            })?;
            validate_batch_output(texts, &vectors, self.dims)?;
            Ok(vectors)
        }
    }
}
