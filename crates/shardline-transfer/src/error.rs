//! Error types for the transfer module.

use shardline_core::{CoreError, TransferManifest};
use shardline_store::StoreError;
use thiserror::Error;

/// Errors that can occur while moving fragments to or from storage.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Every attempt to upload a fragment failed.
    #[error("upload of fragment {index} failed after {attempts} attempt(s): {source}")]
    UploadFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Downloading a fragment failed.
    #[error("download of fragment {index} failed: {source}")]
    DownloadFailed {
        index: usize,
        #[source]
        source: StoreError,
    },

    /// The overall deadline passed before `index` could be transferred.
    #[error("deadline exceeded at fragment {index}")]
    Timeout { index: usize },

    /// The fingerprint of a fragment could not be computed.
    #[error("fingerprinting fragment {index} failed: {source}")]
    Fingerprint {
        index: usize,
        #[source]
        source: CoreError,
    },

    /// Reading fragments or extending the manifest failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A resumed upload was handed fragments that disagree with the manifest.
    #[error("fragment {index} is {found} bytes but the manifest recorded {expected}")]
    ResumeMismatch {
        index: usize,
        expected: u64,
        found: u64,
    },

    /// Configuration rejected before any transfer started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A transfer worker panicked or was cancelled.
    #[error("transfer worker failed: {0}")]
    Worker(String),
}

impl TransferError {
    /// Index of the fragment the error is about, if any.
    pub fn fragment_index(&self) -> Option<usize> {
        match self {
            Self::UploadFailed { index, .. }
            | Self::DownloadFailed { index, .. }
            | Self::Timeout { index }
            | Self::Fingerprint { index, .. }
            | Self::ResumeMismatch { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// An aborted upload: the cause plus every receipt obtained before it.
///
/// The manifest is an index-aligned prefix and can be handed to
/// [`UploadCoordinator::resume`](crate::UploadCoordinator::resume).
#[derive(Debug, Error)]
#[error("{error} ({} fragment(s) uploaded before the failure)", .manifest.len())]
pub struct PartialUpload {
    pub manifest: TransferManifest,
    #[source]
    pub error: TransferError,
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Result of an upload: the full manifest, or what was uploaded before failure.
pub type UploadResult = std::result::Result<TransferManifest, PartialUpload>;
