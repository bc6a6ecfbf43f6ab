//! Ingestion and query orchestration.
//!
//! ```text
//! ingest:  extract ──► chunk ──► Index::add (embed batch, append, snapshot)
//! query:   Index::search_hits (embed query, k-NN)
//! ```
//!
//! Directory ingestion walks the folder in sorted order and treats every
//! document as an independent unit: a document that fails to extract,
//! chunk or embed is reported in its [`IngestOutcome`] and the walk moves
//! on. The snapshot is written once after the walk rather than per document.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use petcare_core::chunk::{chunk_text, ChunkParams};
use petcare_core::models::{IndexStats, IngestOutcome, SearchHit};
use petcare_core::{Error, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract;
use crate::index::Index;

pub struct Retriever {
    index: Arc<Index>,
    params: ChunkParams,
    skip_processed: bool,
    recursive: bool,
    excludes: GlobSet,
}

impl Retriever {
    pub fn new(index: Arc<Index>, config: &Config) -> anyhow::Result<Self> {
        let params = config.chunking.params();
        params.validate().context("invalid [chunking] section")?;
        Ok(Self {
            index,
            params,
            skip_processed: config.retrieval.skip_processed,
            recursive: config.knowledge.recursive,
            excludes: build_globset(&config.knowledge.exclude_globs)?,
        })
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Extract, chunk and index one document under `source_id`.
    ///
    /// Returns the number of chunks added. An already-indexed `source_id`
    /// is ingested again, adding a second copy of its chunks, unless
    /// `retrieval.skip_processed` is set, in which case nothing happens and
    /// `0` is returned.
    pub async fn ingest_document(&self, path: &Path, source_id: &str) -> Result<usize> {
        if self.skip_processed && self.index.exists(source_id) {
            info!(source_id, "Already indexed; skipping");
            return Ok(0);
        }
        self.ingest_unchecked(path, source_id, true).await
    }

    async fn ingest_unchecked(
        &self,
        path: &Path,
        source_id: &str,
        persist: bool,
    ) -> Result<usize> {
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract::extract(&owned))
            .await
            .map_err(|e| Error::document_load(path.display().to_string(), e))??;

        let chunks = chunk_text(&text, &self.params)?;
        debug!(
            source_id,
            chars = text.chars().count(),
            chunks = chunks.len(),
            "Chunked document"
        );

        let added = if persist {
            self.index.add(&chunks, source_id).await?
        } else {
            self.index.append(&chunks, source_id).await?
        };
        info!(source_id, chunks = added, "Ingested document");
        Ok(added)
    }

    /// Ingest every supported document in `dir`.
    ///
    /// Only an unreadable `dir` itself or a failed final snapshot write is an
    /// error; per-document failures land in the returned outcomes. When the
    /// snapshot write fails the ingested documents remain searchable in this
    /// process.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<Vec<IngestOutcome>> {
        self.ingest_tree(dir, self.skip_processed).await
    }

    /// Like [`ingest_directory`](Self::ingest_directory), but documents
    /// already in the index are always skipped and produce no outcome.
    /// Used for the startup knowledge-base load on top of a restored snapshot.
    pub async fn ingest_new_documents(&self, dir: &Path) -> Result<Vec<IngestOutcome>> {
        self.ingest_tree(dir, true).await
    }

    async fn ingest_tree(&self, dir: &Path, skip_processed: bool) -> Result<Vec<IngestOutcome>> {
        let documents = self.scan(dir)?;
        info!(dir = %dir.display(), documents = documents.len(), "Ingesting directory");

        let mut outcomes = Vec::with_capacity(documents.len());
        for (path, source_id) in documents {
            if skip_processed && self.index.exists(&source_id) {
                debug!(source_id = %source_id, "Already indexed; skipping");
                continue;
            }

            let result = self.ingest_unchecked(&path, &source_id, false).await;
            if let Err(e) = &result {
                warn!(source_id = %source_id, kind = e.kind(), error = %e, "Document failed to ingest");
            }
            outcomes.push(IngestOutcome { source_id, result });
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed < outcomes.len() {
            self.index.flush().await?;
        }
        info!(
            dir = %dir.display(),
            ingested = outcomes.len() - failed,
            failed,
            "Directory ingestion finished"
        );
        Ok(outcomes)
    }

    /// Supported files under `dir` as `(path, source_id)`, sorted by source ID.
    ///
    /// The source ID is the path relative to `dir`, which for a
    /// non-recursive walk is just the file name. Hidden entries and files
    /// with unsupported extensions are skipped.
    fn scan(&self, dir: &Path) -> Result<Vec<(std::path::PathBuf, String)>> {
        if !dir.is_dir() {
            return Err(Error::document_load(
                dir.display().to_string(),
                "not a readable directory",
            ));
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        let mut documents = Vec::new();
        for entry in walker {
            let entry =
                entry.map_err(|e| Error::document_load(dir.display().to_string(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_str = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();

            if self.excludes.is_match(&rel_str) {
                debug!(path = %rel_str, "Excluded by glob");
                continue;
            }
            if !extract::is_supported(path) {
                debug!(path = %rel_str, "Unsupported extension; skipping");
                continue;
            }

            documents.push((path.to_path_buf(), rel_str));
        }

        documents.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(documents)
    }

    /// The `top_k` most similar chunks, best first. Empty when nothing is indexed.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.index.search_hits(text, top_k).await
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("invalid exclude glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use petcare_core::embedding::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    fn retriever_with(config: &Config) -> Retriever {
        let embedder = Arc::new(HashEmbedder::new(64).unwrap());
        Retriever::new(Arc::new(Index::in_memory(embedder)), config).unwrap()
    }

    fn retriever() -> Retriever {
        retriever_with(&Config::default())
    }

    #[tokio::test]
    async fn test_reingest_adds_duplicates_by_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cats.txt");
        fs::write(&path, "Cats groom themselves several times a day.").unwrap();

        let r = retriever();
        assert_eq!(r.ingest_document(&path, "cats.txt").await.unwrap(), 1);
        assert_eq!(r.ingest_document(&path, "cats.txt").await.unwrap(), 1);

        let stats = r.index_stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.processed_source_count, 1);
    }

    #[tokio::test]
    async fn test_skip_processed_short_circuits() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cats.txt");
        fs::write(&path, "Cats groom themselves several times a day.").unwrap();

        let mut config = Config::default();
        config.retrieval.skip_processed = true;
        let r = retriever_with(&config);
        assert_eq!(r.ingest_document(&path, "cats.txt").await.unwrap(), 1);
        assert_eq!(r.ingest_document(&path, "cats.txt").await.unwrap(), 0);
        assert_eq!(r.index_stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_unsupported_document_is_not_indexed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.xyz");
        fs::write(&path, "binary").unwrap();

        let r = retriever();
        let err = r.ingest_document(&path, "photo.xyz").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(!r.index().exists("photo.xyz"));
    }

    #[tokio::test]
    async fn test_empty_document_is_processed_with_zero_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.md");
        fs::write(&path, "").unwrap();

        let r = retriever();
        assert_eq!(r.ingest_document(&path, "empty.md").await.unwrap(), 0);
        assert!(r.index().exists("empty.md"));
    }

    #[tokio::test]
    async fn test_scan_skips_hidden_unsupported_and_nested() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "b").unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        fs::write(tmp.path().join(".hidden.txt"), "h").unwrap();
        fs::write(tmp.path().join("image.png"), "png").unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("nested/c.txt"), "c").unwrap();

        let r = retriever();
        let ids: Vec<String> = r
            .scan(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        assert_eq!(ids, vec!["a.md".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_recursive_scan_honors_excludes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(tmp.path().join("guides")).unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("guides/b.txt"), "b").unwrap();
        fs::write(tmp.path().join("drafts/c.txt"), "c").unwrap();

        let mut config = Config::default();
        config.knowledge.recursive = true;
        config.knowledge.exclude_globs = vec!["drafts/**".to_string()];
        let r = retriever_with(&config);

        let ids: Vec<String> = r
            .scan(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        let expected = Path::new("guides").join("b.txt").to_string_lossy().to_string();
        assert_eq!(ids, vec!["a.txt".to_string(), expected]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let r = retriever();
        let err = r
            .ingest_directory(Path::new("/nonexistent/knowledge_base"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentLoad { .. }));
    }

    #[tokio::test]
    async fn test_ingest_new_documents_skips_indexed_sources() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "Dogs need daily walks.").unwrap();
        fs::write(tmp.path().join("b.txt"), "Cats need scratching posts.").unwrap();

        let r = retriever();
        r.ingest_document(&tmp.path().join("a.txt"), "a.txt")
            .await
            .unwrap();

        let outcomes = r.ingest_new_documents(tmp.path()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].source_id, "b.txt");
        assert_eq!(r.index_stats().entry_count, 2);
    }

    #[tokio::test]
    async fn test_directory_run_writes_one_snapshot() {
        let tmp = TempDir::new().unwrap();
        let kb = tmp.path().join("kb");
        fs::create_dir(&kb).unwrap();
        fs::write(kb.join("a.txt"), "Dogs need daily walks.").unwrap();
        fs::write(kb.join("b.txt"), "Cats need scratching posts.").unwrap();
        fs::write(kb.join("c.txt"), "Rabbits need hay.").unwrap();

        let persist_dir = tmp.path().join("index");
        let embedder = Arc::new(HashEmbedder::new(64).unwrap());
        let index = Arc::new(Index::open(embedder, Some(persist_dir.clone())).await.unwrap());
        let r = Retriever::new(Arc::clone(&index), &Config::default()).unwrap();

        let outcomes = r.ingest_directory(&kb).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(index.snapshot_writes(), 1);
        assert!(persist_dir.join(crate::index::SNAPSHOT_FILE).exists());

        fs::write(kb.join("d.txt"), "Ferrets sleep a lot.").unwrap();
        r.ingest_document(&kb.join("d.txt"), "d.txt").await.unwrap();
        assert_eq!(index.snapshot_writes(), 2);
    }

    #[tokio::test]
    async fn test_directory_with_only_failures_writes_no_snapshot() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), b"not a pdf").unwrap();

        let persist_dir = tmp.path().join("index");
        let embedder = Arc::new(HashEmbedder::new(64).unwrap());
        let index = Arc::new(Index::open(embedder, Some(persist_dir)).await.unwrap());
        let r = Retriever::new(Arc::clone(&index), &Config::default()).unwrap();

        let outcomes = r.ingest_directory(tmp.path()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_success());
        assert_eq!(index.snapshot_writes(), 0);
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let mut config = Config::default();
        config.knowledge.exclude_globs = vec!["[unclosed".to_string()];
        let embedder = Arc::new(HashEmbedder::new(8).unwrap());
        assert!(Retriever::new(Arc::new(Index::in_memory(embedder)), &config).is_err());
    }
}
