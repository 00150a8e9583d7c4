//! Error types for the revision chain engine

use thiserror::Error;

use crate::types::SchemaName;

/// Revision engine errors
///
/// Chain builder, stores and the reconstructor never swallow errors; they
/// surface to the calling handler, which owns the wire representation.
#[derive(Error, Debug)]
pub enum RevisionError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Revision chain conflict on object {object_id}: expected head {expected_head}, found {actual_head}")]
    Conflict {
        object_id: String,
        expected_head: String,
        actual_head: String,
    },

    #[error("Schema mismatch: expected {expected}, revision is {actual}")]
    SchemaMismatch {
        expected: SchemaName,
        actual: SchemaName,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation {operation} timed out after {after_ms} ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RevisionError {
    /// Whether the whole create/update flow may be retried with a fresh predecessor
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the error indicates a schema-evolution problem worth investigating
    pub fn is_schema_incompatibility(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. } | Self::Decode(_))
    }

    pub(crate) fn encoding(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }

    pub(crate) fn decode(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for revision operations
pub type RevisionResult<T> = Result<T, RevisionError>;
