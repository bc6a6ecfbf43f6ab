//! Core data models used throughout PetCare Companion.
//!
//! These types represent the chunks, index entries, and search hits that
//! flow through the ingestion and retrieval pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A contiguous slice of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the owning document (its file name).
    pub source_id: String,
    /// Position among the chunks of the same document, starting at 0.
    pub sequence_index: usize,
    pub text: String,
}

/// A stored (vector, chunk) pair. The chunk carries the `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

/// One ranked result of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub source_id: String,
    #[serde(rename = "chunk_text")]
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

impl fmt::Display for SearchHit {
    /// Formats the hit with its source attribution: `From {source_id}: {text}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "From {}: {}", self.source_id, self.text)
    }
}

/// Counters describing the current index contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub entry_count: usize,
    pub processed_source_count: usize,
    pub dimension: usize,
}

/// Result of ingesting one document during bulk ingestion.
#[derive(Debug)]
pub struct IngestOutcome {
    pub source_id: String,
    /// Number of chunks added, or the per-document failure.
    pub result: Result<usize, Error>,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
