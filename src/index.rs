//! The session's vector index: embedding, locking and optional persistence
//! around [`VectorIndex`].
//!
//! # Lifecycle
//!
//! The inner store is created lazily by the first [`Index::add`], so an index
//! that never saw a document holds no state and answers every search with
//! an empty result. With `index.persist_dir` configured, [`Index::open`]
//! restores the snapshot from `{persist_dir}/index.json` and every `add`
//! rewrites it.
//!
//! # Concurrency
//!
//! - One writer at a time: `add` and `clear` hold an async writer mutex for
//!   their whole duration, so concurrent writers queue instead of interleaving.
//! - `add` embeds its batch before taking the state lock and holds the
//!   exclusive lock only for the in-memory append.
//! - Searches take the shared lock after embedding their query.
//!
//! A search running alongside an `add` therefore sees the index either
//! before or after the whole batch, never part of it.
//!
//! # Persistence
//!
//! `add` writes the snapshot after the in-memory append while still holding
//! the writer mutex. If that write fails the batch is rolled back, so a
//! document reported as failed is never searchable. [`Index::append`] skips
//! the write; bulk ingestion uses it and calls [`Index::flush`] once at the
//! end of the run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use petcare_core::embedding::Embedder;
use petcare_core::index::{IndexSnapshot, VectorIndex};
use petcare_core::models::{IndexStats, SearchHit};
use petcare_core::{Error, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Snapshot file name inside `index.persist_dir`.
pub const SNAPSHOT_FILE: &str = "index.json";

pub struct Index {
    embedder: Arc<dyn Embedder>,
    state: RwLock<Option<VectorIndex>>,
    writer: Mutex<()>,
    persist_dir: Option<PathBuf>,
    snapshot_writes: AtomicUsize,
}

impl Index {
    /// An ephemeral index scoped to this process.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            state: RwLock::new(None),
            writer: Mutex::new(()),
            persist_dir: None,
            snapshot_writes: AtomicUsize::new(0),
        }
    }

    /// Open an index, restoring the snapshot under `persist_dir` if one exists.
    ///
    /// A snapshot built with a different model or dimension is an
    /// [`Error::Index`]. [`Index::remove_snapshot`] deletes it without
    /// opening it, which is what `petcare reset` does.
    pub async fn open(embedder: Arc<dyn Embedder>, persist_dir: Option<PathBuf>) -> Result<Self> {
        let Some(dir) = persist_dir else {
            return Ok(Self::in_memory(embedder));
        };

        let path = dir.join(SNAPSHOT_FILE);
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let snapshot: IndexSnapshot = serde_json::from_str(&json).map_err(|e| {
                    Error::Index(format!("corrupt snapshot {}: {}", path.display(), e))
                })?;
                let index =
                    VectorIndex::from_snapshot(snapshot, embedder.model_name(), embedder.dims())?;
                info!(
                    path = %path.display(),
                    entries = index.len(),
                    sources = index.stats().processed_source_count,
                    "Restored index snapshot"
                );
                Some(index)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot yet; starting empty");
                None
            }
            Err(e) => {
                return Err(Error::Index(format!(
                    "failed to read snapshot {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            embedder,
            state: RwLock::new(state),
            writer: Mutex::new(()),
            persist_dir: Some(dir),
            snapshot_writes: AtomicUsize::new(0),
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn persist_dir(&self) -> Option<&Path> {
        self.persist_dir.as_deref()
    }

    // Every VectorIndex mutation validates before it writes, so the data
    // behind a poisoned lock is still consistent.
    fn read_state(&self) -> RwLockReadGuard<'_, Option<VectorIndex>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<VectorIndex>> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether `source_id` has been fully added.
    pub fn exists(&self, source_id: &str) -> bool {
        self.read_state()
            .as_ref()
            .is_some_and(|index| index.exists(source_id))
    }

    /// Embed `chunks` as one batch, append them under `source_id` and
    /// rewrite the snapshot.
    ///
    /// Returns the number of entries added. Embedding failures surface as
    /// [`Error::Embedding`]; store and snapshot failures as [`Error::Index`].
    /// A failed snapshot write undoes the append before returning.
    pub async fn add(&self, chunks: &[String], source_id: &str) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let (added, prev_len, was_processed) = self.append_locked(chunks, source_id).await?;

        if let Err(e) = self.write_snapshot().await {
            if let Some(index) = self.write_state().as_mut() {
                index.revert_batch(prev_len, source_id, was_processed);
            }
            warn!(source_id, error = %e, "Snapshot write failed; batch rolled back");
            return Err(e);
        }
        Ok(added)
    }

    /// Like [`Index::add`] but leaves the snapshot alone. Call
    /// [`Index::flush`] once the run of appends is done.
    pub async fn append(&self, chunks: &[String], source_id: &str) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let (added, _, _) = self.append_locked(chunks, source_id).await?;
        Ok(added)
    }

    /// Caller must hold the writer lock. Returns the entries added, the
    /// entry count before the batch and whether `source_id` was known.
    async fn append_locked(
        &self,
        chunks: &[String],
        source_id: &str,
    ) -> Result<(usize, usize, bool)> {
        let vectors = self.embedder.embed_many(chunks).await?;

        let mut state = self.write_state();
        let index = state.get_or_insert_with(|| {
            info!(
                model = self.embedder.model_name(),
                dims = self.embedder.dims(),
                "Initializing vector index"
            );
            VectorIndex::new(self.embedder.model_name(), self.embedder.dims())
        });
        let prev_len = index.len();
        let was_processed = index.exists(source_id);
        let added = index.insert_batch(source_id, chunks, vectors)?;
        Ok((added, prev_len, was_processed))
    }

    /// Nearest-neighbour search returning ranked hits.
    pub async fn search_hits(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 || self.read_state().as_ref().map_or(true, |i| i.is_empty()) {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query).await?;
        match self.read_state().as_ref() {
            Some(index) => index.search(&query_vec, top_k),
            None => Ok(Vec::new()),
        }
    }

    /// Nearest-neighbour search formatted as `From {source_id}: {text}`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        Ok(self
            .search_hits(query, top_k)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        match self.read_state().as_ref() {
            Some(index) => index.stats(),
            None => IndexStats {
                entry_count: 0,
                processed_source_count: 0,
                dimension: self.embedder.dims(),
            },
        }
    }

    /// Drop every entry and delete the snapshot file.
    pub async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        *self.write_state() = None;

        if let Some(dir) = &self.persist_dir {
            Self::remove_snapshot(dir).await?;
        }
        Ok(())
    }

    /// Delete the snapshot under `dir` without reading it.
    ///
    /// Returns whether a snapshot was there. Works for snapshots this build
    /// could not open, such as one written with another embedding model.
    pub async fn remove_snapshot(dir: &Path) -> Result<bool> {
        let path = dir.join(SNAPSHOT_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed index snapshot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Index(format!(
                "failed to remove snapshot {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Number of snapshot files written by this handle.
    pub fn snapshot_writes(&self) -> usize {
        self.snapshot_writes.load(Ordering::Relaxed)
    }

    /// Write the current state to disk. No-op for in-memory indexes.
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.write_snapshot().await
    }

    /// Caller must hold the writer lock.
    async fn write_snapshot(&self) -> Result<()> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        let Some(snapshot) = self.read_state().as_ref().map(VectorIndex::to_snapshot) else {
            return Ok(());
        };

        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| Error::Index(format!("failed to serialize snapshot: {}", e)))?;
        let io_err = |e: std::io::Error| Error::Index(format!("failed to write snapshot: {}", e));

        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        let path = dir.join(SNAPSHOT_FILE);
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        self.snapshot_writes.fetch_add(1, Ordering::Relaxed);

        debug!(path = %path.display(), entries = snapshot.entries.len(), "Wrote index snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use petcare_core::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn hash_embedder(dims: usize) -> Arc<dyn Embedder> {
        Arc::new(HashEmbedder::new(dims).unwrap())
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding {
                batch: texts.to_vec(),
                message: "backend unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_index_search_is_empty() {
        let index = Index::in_memory(hash_embedder(64));
        assert!(index.search("anything at all", 5).await.unwrap().is_empty());
        assert_eq!(
            index.stats(),
            IndexStats {
                entry_count: 0,
                processed_source_count: 0,
                dimension: 64
            }
        );
    }

    #[tokio::test]
    async fn test_add_then_exists_and_stats() {
        let index = Index::in_memory(hash_embedder(64));
        let added = index.add(&texts(&["a", "b", "c"]), "doc1").await.unwrap();
        assert_eq!(added, 3);
        assert!(index.exists("doc1"));
        assert!(!index.exists("doc2"));
        assert_eq!(index.stats().entry_count, 3);
        assert_eq!(index.stats().processed_source_count, 1);
    }

    #[tokio::test]
    async fn test_search_formats_with_source_attribution() {
        let index = Index::in_memory(hash_embedder(256));
        index
            .add(
                &texts(&["Cats need taurine in their diet.", "Parrots enjoy chew toys."]),
                "nutrition.txt",
            )
            .await
            .unwrap();

        let results = index.search("cats need taurine in their diet", 1).await.unwrap();
        assert_eq!(
            results,
            vec!["From nutrition.txt: Cats need taurine in their diet.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_search_respects_top_k_and_order() {
        let index = Index::in_memory(hash_embedder(256));
        index
            .add(&texts(&["dog walk", "dog food bowl", "fish tank", "dog"]), "a.txt")
            .await
            .unwrap();
        let hits = index.search_hits("dog", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].text, "dog");
        assert!(hits.iter().all(|h| h.source_id == "a.txt"));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates_and_leaves_index_empty() {
        let index = Index::in_memory(Arc::new(FailingEmbedder));
        let err = index.add(&texts(&["x"]), "doc1").await.unwrap_err();
        assert!(matches!(err, Error::Embedding { ref batch, .. } if batch == &texts(&["x"])));
        assert!(!index.exists("doc1"));
        assert_eq!(index.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_persistent_index_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("index");

        let first = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        first
            .add(&texts(&["Rabbits need hay.", "Hamsters are nocturnal."]), "small.md")
            .await
            .unwrap();
        assert!(dir.join(SNAPSHOT_FILE).exists());
        let before = first.search("hay for rabbits", 2).await.unwrap();

        let second = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        assert_eq!(second.stats(), first.stats());
        assert!(second.exists("small.md"));
        assert_eq!(second.search("hay for rabbits", 2).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_snapshot_dimension_mismatch_is_index_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();

        let index = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        index.add(&texts(&["a"]), "doc1").await.unwrap();

        let err = Index::open(hash_embedder(32), Some(dir)).await.err().unwrap();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test]
    async fn test_clear_removes_entries_and_snapshot() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();

        let index = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        index.add(&texts(&["a", "b"]), "doc1").await.unwrap();
        index.clear().await.unwrap();

        assert_eq!(index.stats().entry_count, 0);
        assert!(!index.exists("doc1"));
        assert!(!dir.join(SNAPSHOT_FILE).exists());
        assert!(index.search("a", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_serialized() {
        let index = Arc::new(Index::in_memory(hash_embedder(32)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                let source = format!("doc{}.txt", i);
                index.add(&texts(&["one", "two", "three"]), &source).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 3);
        }
        let stats = index.stats();
        assert_eq!(stats.entry_count, 24);
        assert_eq!(stats.processed_source_count, 8);
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_rolls_back_batch() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("index");

        let index = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        index.add(&texts(&["Rabbits need hay."]), "doc1").await.unwrap();

        // A plain file where the snapshot directory should be.
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, "not a directory").unwrap();

        let err = index
            .add(&texts(&["Ferrets sleep most of the day."]), "doc2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
        assert!(!index.exists("doc2"));
        assert!(index.exists("doc1"));
        assert_eq!(index.stats().entry_count, 1);

        let hits = index.search_hits("Ferrets sleep most of the day.", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.source_id == "doc1"));
    }

    #[tokio::test]
    async fn test_append_defers_snapshot_until_flush() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();

        let index = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        index.append(&texts(&["a"]), "doc1").await.unwrap();
        index.append(&texts(&["b"]), "doc2").await.unwrap();
        assert!(!dir.join(SNAPSHOT_FILE).exists());
        assert_eq!(index.snapshot_writes(), 0);

        index.flush().await.unwrap();
        assert_eq!(index.snapshot_writes(), 1);
        let reopened = Index::open(hash_embedder(64), Some(dir)).await.unwrap();
        assert!(reopened.exists("doc1") && reopened.exists("doc2"));
    }

    #[tokio::test]
    async fn test_remove_snapshot_ignores_model_mismatch() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();

        let index = Index::open(hash_embedder(64), Some(dir.clone())).await.unwrap();
        index.add(&texts(&["a"]), "doc1").await.unwrap();
        assert!(Index::open(hash_embedder(32), Some(dir.clone())).await.is_err());

        assert!(Index::remove_snapshot(&dir).await.unwrap());
        assert!(!Index::remove_snapshot(&dir).await.unwrap());
        let reopened = Index::open(hash_embedder(32), Some(dir)).await.unwrap();
        assert_eq!(reopened.stats().entry_count, 0);
        assert_eq!(reopened.stats().dimension, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_partial_batch() {
        let index = Arc::new(Index::in_memory(hash_embedder(32)));

        let writer = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for i in 0..10 {
                    let source = format!("doc{}.txt", i);
                    index
                        .add(&texts(&["a", "b", "c", "d", "e"]), &source)
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let reader = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                loop {
                    let seen = index.search_hits("a", 1000).await.unwrap().len();
                    assert_eq!(seen % 5, 0, "search saw {} entries", seen);
                    let count = index.stats().entry_count;
                    assert_eq!(count % 5, 0, "stats saw {} entries", count);
                    if count == 50 {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(index.stats().entry_count, 50);
    }
}
