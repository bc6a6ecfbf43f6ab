//! # PetCare Core
//!
//! Storage-agnostic retrieval logic for PetCare Companion: data models,
//! chunking, the embedding trait, the in-memory vector index, and the
//! error taxonomy shared by every layer.
//!
//! This crate does no filesystem I/O and pulls in no async runtime. File
//! extraction, model loading, persistence and the CLI live in the
//! `petcare-companion` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;

pub use error::{Error, Result};
