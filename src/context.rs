//! Application context: the embedder, index and retriever for one session.
//!
//! Built once at startup and passed by reference to whatever needs it.
//! There is no process-wide state; dropping the context ends the session.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use petcare_core::embedding::Embedder;
use petcare_core::models::IngestOutcome;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index::Index;
use crate::retriever::Retriever;

pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<Index>,
    pub retriever: Retriever,
}

impl AppContext {
    /// Construct the session without touching the knowledge base.
    ///
    /// Fails if the embedding model cannot be loaded or a persisted
    /// snapshot does not match it.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let embedder = create_embedder(&config.embedding)
            .await
            .context("failed to initialize embedding model")?;
        let index = Arc::new(
            Index::open(Arc::clone(&embedder), config.index.persist_dir.clone())
                .await
                .context("failed to open index")?,
        );
        let retriever = Retriever::new(Arc::clone(&index), &config)?;

        Ok(Self {
            config,
            embedder,
            index,
            retriever,
        })
    }

    /// [`open`](Self::open), then load `knowledge.dir` if one is configured.
    ///
    /// Documents already restored from the snapshot are not ingested again.
    /// Per-document failures are logged and do not fail startup.
    pub async fn init(config: Config) -> Result<Self> {
        let ctx = Self::open(config).await?;
        ctx.bootstrap_knowledge().await?;
        Ok(ctx)
    }

    async fn bootstrap_knowledge(&self) -> Result<Vec<IngestOutcome>> {
        let Some(dir) = &self.config.knowledge.dir else {
            return Ok(Vec::new());
        };
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Knowledge directory not found; starting without it");
            return Ok(Vec::new());
        }

        let outcomes = self.retriever.ingest_new_documents(dir).await?;
        let stats = self.index.stats();
        info!(
            new_documents = outcomes.iter().filter(|o| o.is_success()).count(),
            entries = stats.entry_count,
            sources = stats.processed_source_count,
            "Knowledge base ready"
        );
        Ok(outcomes)
    }

    /// Flush the index snapshot, if persistence is configured.
    pub async fn shutdown(self) -> Result<()> {
        self.index.flush().await.context("failed to flush index")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn hash_config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = Some(64);
        config.index.persist_dir = Some(tmp.path().join("index"));
        config
    }

    #[tokio::test]
    async fn test_init_bootstraps_knowledge_dir_once() {
        let tmp = TempDir::new().unwrap();
        let kb = tmp.path().join("knowledge_base");
        fs::create_dir(&kb).unwrap();
        fs::write(kb.join("dogs.txt"), "Dogs need daily exercise.").unwrap();
        fs::write(kb.join("cats.md"), "Cats sleep most of the day.").unwrap();

        let mut config = hash_config(&tmp);
        config.knowledge.dir = Some(kb.clone());

        let first = AppContext::init(config.clone()).await.unwrap();
        assert_eq!(first.index.stats().entry_count, 2);
        first.shutdown().await.unwrap();

        let second = AppContext::init(config).await.unwrap();
        let stats = second.index.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.processed_source_count, 2);
    }

    #[tokio::test]
    async fn test_missing_knowledge_dir_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut config = hash_config(&tmp);
        config.knowledge.dir = Some(tmp.path().join("absent"));

        let ctx = AppContext::init(config).await.unwrap();
        assert_eq!(ctx.index.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_open() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(AppContext::open(config).await.is_err());
    }
}
