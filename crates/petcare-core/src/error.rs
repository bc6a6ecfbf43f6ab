//! Error taxonomy for the retrieval core.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by extraction, chunking, embedding and indexing.
///
/// Bulk ingestion records every failure of a single document (usually
/// [`Error::UnsupportedFormat`] or [`Error::DocumentLoad`], but also
/// embedding or store failures) in that document's outcome and keeps going.
/// Outside bulk ingestion every error propagates to the immediate caller.
#[derive(Error, Debug)]
pub enum Error {
    /// File extension has no extraction strategy. Never retried.
    #[error("unsupported file format: '{0}'")]
    UnsupportedFormat(String),

    /// I/O or decoding failure while reading a document.
    #[error("failed to load document {path}: {message}")]
    DocumentLoad {
        /// Path of the document that failed.
        path: String,
        /// Underlying cause.
        message: String,
    },

    /// Embedding backend could not be constructed.
    #[error("failed to initialize embedding model: {0}")]
    ModelInit(String),

    /// Inference failed; carries the batch that was being embedded.
    #[error("embedding failed for batch of {} text(s): {message}", batch.len())]
    Embedding {
        /// The offending input batch.
        batch: Vec<String>,
        /// Underlying cause.
        message: String,
    },

    /// Structural failure in the vector store or its snapshot.
    #[error("index error: {0}")]
    Index(String),

    /// `overlap >= chunk_size`, or `chunk_size == 0`.
    #[error("invalid chunk parameters: chunk_size={chunk_size}, overlap={overlap} (overlap must be smaller than chunk_size)")]
    InvalidChunkParams {
        /// Configured chunk size.
        chunk_size: usize,
        /// Configured overlap.
        overlap: usize,
    },
}

impl Error {
    /// Build a [`Error::DocumentLoad`] from a path and any displayable cause.
    pub fn document_load(path: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::DocumentLoad {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// Short, stable tag for the variant, used in CLI and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::DocumentLoad { .. } => "DocumentLoadError",
            Error::ModelInit(_) => "ModelInitError",
            Error::Embedding { .. } => "EmbeddingError",
            Error::Index(_) => "IndexError",
            Error::InvalidChunkParams { .. } => "InvalidChunkParams",
        }
    }
}
