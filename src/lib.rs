//! # PetCare Companion
//!
//! Retrieval core for a pet-care question answering assistant.
//!
//! Documents (PDF, DOCX, plain text, Markdown, CSV) are extracted to text,
//! split into overlapping chunks, embedded, and stored in a vector index
//! that answers nearest-neighbour queries with source attribution. The
//! language model and web search are external collaborators plugged in
//! through the [`assistant`] traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │ Extractor │──▶│ Chunker │──▶│ Embedder │──▶│ Index       │
//! │ pdf/docx/ │   │ 1000/200│   │ fastembed│   │ cosine k-NN │
//! │ txt/md/csv│   └─────────┘   │ or hash  │   │ + snapshot  │
//! └───────────┘                 └──────────┘   └──────┬──────┘
//!                                                     │
//!                              ┌──────────────────────┤
//!                              ▼                      ▼
//!                        ┌───────────┐         ┌────────────┐
//!                        │ Retriever │────────▶│ Assistant  │
//!                        └───────────┘         │ + web      │
//!                                              └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Format-specific text extraction |
//! | [`embedding`] | Embedding provider construction |
//! | [`index`] | Locked, optionally persistent vector index |
//! | [`retriever`] | Document and directory ingestion, query |
//! | [`context`] | Session construction and teardown |
//! | [`assistant`] | Answer orchestration with web fallback |
//!
//! Chunking, the [`Embedder`](petcare_core::embedding::Embedder) trait and
//! the in-memory vector store live in the `petcare-core` crate.

pub mod assistant;
pub mod config;
pub mod context;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod retriever;
