//! In-memory vector index with brute-force cosine search.
//!
//! [`VectorIndex`] owns the stored `(vector, chunk)` entries and the set of
//! processed source IDs. It is a plain data structure: embedding, locking
//! and persistence are layered on top by the app crate's `Index`.
//!
//! Mutation goes through `&mut self`, so concurrent writers are ruled out
//! at compile time; callers share the index behind a lock.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, IndexEntry, IndexStats, SearchHit};

/// Snapshot format version written by [`VectorIndex::to_snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable image of a [`VectorIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub model: String,
    pub dims: usize,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
    pub processed_sources: Vec<String>,
}

/// Vector store keyed by insertion order.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
    processed_sources: HashSet<String>,
}

impl VectorIndex {
    /// Create an empty index whose vectors must all have `dims` dimensions.
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            entries: Vec::new(),
            processed_sources: HashSet::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `source_id` has completed an insert.
    pub fn exists(&self, source_id: &str) -> bool {
        self.processed_sources.contains(source_id)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            entry_count: self.entries.len(),
            processed_source_count: self.processed_sources.len(),
            dimension: self.dims,
        }
    }

    /// Append one document's chunks and their vectors as a single batch.
    ///
    /// Everything is validated before the first entry is appended, so a
    /// rejected batch leaves the index untouched. Chunks are numbered from
    /// 0 in the order given. An empty batch still marks the source as
    /// processed.
    pub fn insert_batch(
        &mut self,
        source_id: &str,
        texts: &[String],
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if texts.len() != vectors.len() {
            return Err(Error::Index(format!(
                "{} chunks but {} vectors for source '{}'",
                texts.len(),
                vectors.len(),
                source_id
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(Error::Index(format!(
                "dimension mismatch: index has {}, vector has {}",
                self.dims,
                bad.len()
            )));
        }

        let added = texts.len();
        self.entries.reserve(added);
        for (sequence_index, (text, vector)) in texts.iter().zip(vectors).enumerate() {
            self.entries.push(IndexEntry {
                vector,
                chunk: Chunk {
                    source_id: source_id.to_string(),
                    sequence_index,
                    text: text.clone(),
                },
            });
        }
        self.processed_sources.insert(source_id.to_string());

        tracing::debug!(source_id, added, total = self.entries.len(), "Appended batch");
        Ok(added)
    }

    /// Rank every entry by cosine similarity to `query` and keep the top `top_k`.
    ///
    /// Results are in descending score order. Equal scores keep insertion
    /// order (the sort is stable), so the earliest-inserted entry wins.
    /// A NaN score ranks last.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dims {
            return Err(Error::Index(format!(
                "query dimension mismatch: index has {}, query has {}",
                self.dims,
                query.len()
            )));
        }
        if top_k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| rank_key(b.0).total_cmp(&rank_key(a.0)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| SearchHit {
                source_id: e.chunk.source_id.clone(),
                text: e.chunk.text.clone(),
                score,
            })
            .collect())
    }

    /// Undo the latest [`insert_batch`](Self::insert_batch) for `source_id`.
    ///
    /// `len` is the entry count before that batch and `was_processed`
    /// whether the source was already known, both captured by the caller
    /// just before inserting.
    pub fn revert_batch(&mut self, len: usize, source_id: &str, was_processed: bool) {
        self.entries.truncate(len);
        if !was_processed {
            self.processed_sources.remove(source_id);
        }
        tracing::debug!(source_id, total = self.entries.len(), "Reverted batch");
    }

    /// Drop all entries and processed sources.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.processed_sources.clear();
    }

    pub fn to_snapshot(&self) -> IndexSnapshot {
        let mut processed_sources: Vec<String> = self.processed_sources.iter().cloned().collect();
        processed_sources.sort();
        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            saved_at: Utc::now(),
            entries: self.entries.clone(),
            processed_sources,
        }
    }

    /// Rebuild an index from a snapshot written for the same model and dimension.
    pub fn from_snapshot(snapshot: IndexSnapshot, model: &str, dims: usize) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Index(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        if snapshot.dims != dims {
            return Err(Error::Index(format!(
                "snapshot dimension {} does not match embedder dimension {}",
                snapshot.dims, dims
            )));
        }
        if snapshot.model != model {
            return Err(Error::Index(format!(
                "snapshot was built with model '{}', embedder is '{}'",
                snapshot.model, model
            )));
        }
        if let Some(bad) = snapshot.entries.iter().find(|e| e.vector.len() != dims) {
            return Err(Error::Index(format!(
                "snapshot entry from '{}' has {} dimensions, expected {}",
                bad.chunk.source_id,
                bad.vector.len(),
                dims
            )));
        }

        Ok(Self {
            model: snapshot.model,
            dims,
            entries: snapshot.entries,
            processed_sources: snapshot.processed_sources.into_iter().collect(),
        })
    }
}

/// NaN scores (from a degenerate vector) rank below every real score.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}
