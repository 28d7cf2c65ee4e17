//! Error types for the store module.

use shardline_core::{CoreError, Fingerprint};
use thiserror::Error;

/// Errors that can occur talking to a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure reaching the network.
    #[error("network error: {0}")]
    Network(String),

    /// The submitting account cannot pay for the transaction.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The call did not finish before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Network-side inclusion proof did not check out.
    #[error("inclusion proof invalid for {0}")]
    ProofInvalid(Fingerprint),

    /// No fragment stored under this fingerprint.
    #[error("fragment not found: {0}")]
    NotFound(Fingerprint),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Fingerprinting the payload failed.
    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] CoreError),

    /// Options serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
