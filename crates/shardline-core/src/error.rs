//! Error types for Shardline Core.

use thiserror::Error;

use crate::types::Fingerprint;

/// Errors raised by fragmenting, fingerprinting, verification and reassembly.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Local read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The fingerprint oracle could not produce a digest.
    #[error("fingerprint computation failed: {0}")]
    Compute(String),

    /// Original and retrieved sequences have different lengths.
    #[error("shape mismatch: {original} original fragments, {retrieved} retrieved")]
    ShapeMismatch { original: usize, retrieved: usize },

    /// A fragment index is missing or out of order.
    #[error("gap detected: expected fragment {expected}, found {found:?}")]
    GapDetected {
        expected: usize,
        found: Option<usize>,
    },

    /// Recomputed fingerprints disagree.
    #[error("integrity mismatch at fragment {index}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        index: usize,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    /// `fragment_size × max_parts` cannot cover the source.
    #[error("source of {source_len} bytes exceeds fragment capacity of {capacity} bytes")]
    Truncation { source_len: u64, capacity: u64 },

    /// A manifest receipt sits at the wrong position.
    #[error("manifest misaligned: receipt at position {position} carries index {index}")]
    ManifestMisaligned { position: usize, index: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
