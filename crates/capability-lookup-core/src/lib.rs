//! # Capability Lookup Core
//!
//! Shared, I/O-free logic for Capability Lookup: the raw table model,
//! header inference, record extraction, chunking, the embedding/generation
//! and vector store traits, and the error taxonomy.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem code. Readers,
//! providers and durable stores live in the `capability-lookup` app crate
//! and plug in through the traits defined here.
//!
//! ```text
//! RawTable ─▶ schema::infer_header ─▶ extract ─▶ CapabilityRecord
//!                                                  │
//!                                        chunk::chunk_record
//!                                                  ▼
//!                         Embedder ─▶ VectorCollection::add / query
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod models;
pub mod schema;
pub mod store;
pub mod table;
