//! Overlapping, word-boundary-aware text chunker.
//!
//! Splits extracted document text into bounded windows that overlap by a
//! fixed number of characters, so a sentence cut at one boundary still
//! appears whole in the neighbouring chunk.
//!
//! # Algorithm
//!
//! 1. Start a cursor at 0 and take `end = min(start + chunk_size, len)`.
//! 2. If `end` is not the end of the text, walk it backward until the
//!    character at `end` is whitespace, so no word is split. If the walk
//!    reaches `start`, keep the unadjusted `end`.
//! 3. Emit `text[start..end]`.
//! 4. Move the cursor to `end - overlap`, or to `end` when snapping left
//!    too little room for the overlap to make progress.
//!
//! Lengths and positions count `char`s, not bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use petcare_core::chunk::{chunk_text, ChunkParams};
//!
//! let chunks = chunk_text("Cats groom themselves daily.", &ChunkParams::default()).unwrap();
//! assert_eq!(chunks, vec!["Cats groom themselves daily.".to_string()]);
//! ```

use std::ops::Range;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_OVERLAP: usize = 200;

/// Chunk window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let params = Self {
            chunk_size,
            overlap,
        };
        params.validate()?;
        Ok(params)
    }

    /// `overlap < chunk_size` is required for the cursor to advance.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.overlap >= self.chunk_size {
            return Err(Error::InvalidChunkParams {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty input. Fails with
/// [`Error::InvalidChunkParams`] before doing any work if the parameters
/// could not make forward progress.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Result<Vec<String>> {
    params.validate()?;
    let chars: Vec<char> = text.chars().collect();
    Ok(chunk_spans(&chars, params)
        .into_iter()
        .map(|span| chars[span].iter().collect())
        .collect())
}

/// Chunk a document's text and attach its `source_id` and sequence indices.
pub fn chunk_document(source_id: &str, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>> {
    Ok(chunk_text(text, params)?
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            source_id: source_id.to_string(),
            sequence_index,
            text,
        })
        .collect())
}

/// Character ranges of each chunk. `params` must already be validated.
fn chunk_spans(chars: &[char], params: &ChunkParams) -> Vec<Range<usize>> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let limit = (start + params.chunk_size).min(len);
        let mut end = limit;

        if end < len {
            while end > start && !chars[end].is_whitespace() {
                end -= 1;
            }
            if end == start {
                end = limit;
            }
        }

        spans.push(start..end);

        start = if end < len {
            let next = end.saturating_sub(params.overlap);
            if next > start {
                next
            } else {
                end
            }
        } else {
            len
        };
    }

    spans
}
