//! Error types for DocStore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::document::DocumentId;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error type for DocStore operations
#[derive(Debug, Error)]
pub enum EngineError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Validation error on field '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Conflict: path '{path}' is already indexed by document {existing}")]
    Conflict { path: String, existing: DocumentId },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Engine is read-only: {0}")]
    ReadOnly(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create a validation error for the named field
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Create a not-found error for a document id
    pub fn document_not_found(id: &DocumentId) -> Self {
        Self::NotFound {
            what: format!("document {}", id),
        }
    }

    /// Create a not-found error for an indexed path
    pub fn path_not_found(path: &str) -> Self {
        Self::NotFound {
            what: format!("path '{}'", path),
        }
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// True for `Corruption`
    ///
    /// The engine enters read-only mode when a WAL append or an automatic
    /// checkpoint fails this way.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
