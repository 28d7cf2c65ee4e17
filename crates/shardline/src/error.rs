//! Error types for the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardline_core::{CoreError, TransferManifest};
use shardline_store::StoreError;
use shardline_transfer::TransferError;
use thiserror::Error;

/// A pipeline stage, named in failures and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Fragment,
    Upload,
    Download,
    Verify,
    Combine,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Fragment => "fragment",
            Stage::Upload => "upload",
            Stage::Download => "download",
            Stage::Verify => "verify",
            Stage::Combine => "combine",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can stop a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Local I/O, fragmentation, verification or reassembly error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage backend error outside a coordinated transfer.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Upload or download error.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Configuration rejected before the pipeline started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The driver has already left `Idle`.
    #[error("pipeline already started (current state: {0})")]
    AlreadyStarted(String),
}

impl PipelineError {
    /// Index of the fragment the error is about, if any.
    pub fn fragment_index(&self) -> Option<usize> {
        match self {
            Self::Transfer(e) => e.fragment_index(),
            Self::Core(CoreError::IntegrityMismatch { index, .. }) => Some(*index),
            Self::Core(CoreError::GapDetected { expected, .. }) => Some(*expected),
            _ => None,
        }
    }
}

/// Why the pipeline halted: the stage, the cause, and for a failed upload
/// the manifest of fragments that did make it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    /// Receipts obtained before an upload failure, for a later resume.
    pub partial_manifest: Option<TransferManifest>,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
            partial_manifest: None,
        }
    }

    pub fn fragment_index(&self) -> Option<usize> {
        self.error.fragment_index()
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, StageFailure>;
