//! Error types for capture-core

use thiserror::Error;

use crate::models::{RecordId, RevisionId, TableName};
use crate::revision::TreeError;

/// Result type alias using capture-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in capture-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record unknown to this replica
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A new revision was requested on top of a revision the tree does not hold
    #[error("Parent revision {parent} is not part of record {record_id}")]
    InvalidParent {
        record_id: RecordId,
        parent: RevisionId,
    },

    /// Revision tree rejected an operation
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Ancestors of a pulled revision are permanently unavailable
    #[error("Irrecoverable gap in {table}/{record_id}: missing ancestor {missing}")]
    IrrecoverableGap {
        table: TableName,
        record_id: RecordId,
        missing: RevisionId,
    },

    /// Remote authority could not be reached or answered with an error
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Sync cycle was cancelled by the caller
    #[error("Sync cycle cancelled")]
    Cancelled,
}
