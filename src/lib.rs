//! # Capability Lookup
//!
//! Turns loosely structured estimation workbooks into a searchable
//! knowledge base and answers "has something like this been estimated
//! before?" with a summary plus cost, team and system-impact analyses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  .xlsx dir  │──▶│ Schema infer │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  workbooks  │   │  + extract   │   │  (bounded)   │   │ vectors   │
//! └─────────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                              │
//!                                    ┌─────────────────────────┘
//!                                    ▼
//!                           ┌─────────────────┐    ┌────────────┐
//!                           │  Orchestrator   │──▶│ Generation │
//!                           │ (top-k + 4 LLM) │    │  provider  │
//!                           └─────────────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! caplook init                          # create the index
//! caplook index --dir "./Sample Estimations"
//! caplook search "mutual funds" --limit 3 --json
//! caplook stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`workbook`] | `.xlsx` reader |
//! | [`ingest`] | Indexing pipeline |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text-generation providers |
//! | [`analysis`] | Analysis kinds and prompts |
//! | [`search`] | Retrieval orchestrator |
//! | [`engine`] | Lifecycle state machine |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`stats`] | Collection statistics |
//! | [`progress`] | Index progress reporting |
//! | [`db`] | Database connection |
//! | [`deadline`] | Vector store call deadlines |
//! | [`migrate`] | Schema migrations |
//!
//! Pure logic (schema inference, extraction, chunking, store traits) lives
//! in the `capability-lookup-core` crate.

pub mod analysis;
pub mod config;
pub mod db;
pub mod deadline;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod workbook;
