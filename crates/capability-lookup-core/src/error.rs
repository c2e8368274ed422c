//! Error taxonomy shared by the pipeline.
//!
//! Each variant family maps to the granularity at which it is recovered:
//! schema inference failures skip a file, extraction errors skip a row,
//! embedding and generation errors skip a chunk or an analysis, and index
//! errors fail the store operation that raised them.

use thiserror::Error;

/// No header row could be located in a table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaInferenceError {
    /// None of the scanned rows mapped every required canonical name.
    #[error("no header found in the first {scanned} rows (missing: {missing})")]
    NoHeaderFound { scanned: usize, missing: String },

    /// The table has no rows at all.
    #[error("table is empty")]
    EmptyTable,
}

/// A single row could not be turned into a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("row {row}: required field '{field}' is absent")]
    MissingField { row: usize, field: String },

    #[error("row {row}: summary row '{label}' skipped")]
    SummaryRow { row: usize, label: String },
}

impl ExtractionError {
    /// Table row index the error refers to.
    pub fn row(&self) -> usize {
        match self {
            ExtractionError::MissingField { row, .. } | ExtractionError::SummaryRow { row, .. } => {
                *row
            }
        }
    }
}

/// Failure of the embedding capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding call timed out after {0}s")]
    Timeout(u64),

    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failure of the text-generation capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("generation provider is disabled")]
    Disabled,

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation call timed out after {0}s")]
    Timeout(u64),

    #[error("generation response invalid: {0}")]
    InvalidResponse(String),
}

/// The vector store rejected an operation.
///
/// Every variant names the collection and the operation so callers can
/// report or retry precisely.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("collection '{collection}': {operation} failed: {message}")]
    Backend {
        collection: String,
        operation: &'static str,
        message: String,
    },

    #[error(
        "collection '{collection}': {operation} rejected: collection uses {existing} distance, requested {requested}"
    )]
    MetricMismatch {
        collection: String,
        operation: &'static str,
        existing: String,
        requested: String,
    },

    #[error(
        "collection '{collection}': {operation} rejected: vector has {actual} dimensions, collection has {expected}"
    )]
    DimensionMismatch {
        collection: String,
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("collection '{collection}': {operation} timed out after {secs}s")]
    Timeout {
        collection: String,
        operation: &'static str,
        secs: u64,
    },
}

impl IndexError {
    pub fn backend(
        collection: &str,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        IndexError::Backend {
            collection: collection.to_string(),
            operation,
            message: message.to_string(),
        }
    }

    /// Name of the collection the failed operation targeted.
    pub fn collection(&self) -> &str {
        match self {
            IndexError::Backend { collection, .. }
            | IndexError::MetricMismatch { collection, .. }
            | IndexError::DimensionMismatch { collection, .. }
            | IndexError::Timeout { collection, .. } => collection,
        }
    }

    /// Operation that failed (`"add"`, `"query"`, `"count"`, ...).
    pub fn operation(&self) -> &'static str {
        match self {
            IndexError::Backend { operation, .. }
            | IndexError::MetricMismatch { operation, .. }
            | IndexError::DimensionMismatch { operation, .. }
            | IndexError::Timeout { operation, .. } => operation,
        }
    }
}
