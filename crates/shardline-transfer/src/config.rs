//! Tunables for upload and download.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardline_store::UploadOptions;

use crate::error::{Result, TransferError};
use crate::retry::RetryPolicy;

/// Configuration for batched upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Fragments per batch.
    pub batch_size: usize,
    /// Attempts per fragment before giving up.
    pub max_retries: u32,
    /// Budget for a single upload attempt.
    pub attempt_timeout: Duration,
    /// Budget for the whole upload, all batches included.
    pub overall_timeout: Duration,
    /// Pause between consecutive batches.
    pub batch_cooldown: Duration,
    /// Upload the fragments of a batch concurrently.
    pub parallel_within_batch: bool,
    /// Passed through to the storage client on every attempt.
    pub options: UploadOptions,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_retries: 3,
            attempt_timeout: Duration::from_secs(30 * 60),
            overall_timeout: Duration::from_secs(30 * 60),
            batch_cooldown: Duration::from_secs(5),
            parallel_within_batch: false,
            options: UploadOptions::default(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TransferError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.attempt_timeout.is_zero() || self.overall_timeout.is_zero() {
            return Err(TransferError::InvalidConfig(
                "upload timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

/// Configuration for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Ask the storage client to check network-side proofs.
    pub verify_proof: bool,
    /// Budget for the whole download.
    pub timeout: Duration,
    /// Fragments fetched concurrently; 1 is sequential.
    pub parallelism: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            verify_proof: true,
            timeout: Duration::from_secs(30 * 60),
            parallelism: 1,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(TransferError::InvalidConfig(
                "parallelism must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TransferError::InvalidConfig(
                "download timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
