//! Runtime configuration for a pipeline run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shardline_transfer::{DownloadConfig, UploadConfig};

use crate::error::PipelineError;

/// Everything a [`PipelineDriver`](crate::PipelineDriver) needs to know.
///
/// Read once before the run and never changed during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bytes per fragment (the last one may be shorter).
    pub fragment_size: usize,
    /// Upper bound on the number of fragments.
    pub max_parts: usize,
    /// Accept a source longer than `fragment_size * max_parts`, silently
    /// dropping its tail.
    pub allow_truncation: bool,
    /// Write a deterministic test file of this many bytes to the input path
    /// before fragmenting.
    pub generate_test_file: Option<u64>,
    pub upload: UploadConfig,
    pub download: DownloadConfig,
    /// Directory holding the download spool.
    pub work_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fragment_size: 4 * 1024 * 1024,
            max_parts: 10,
            allow_truncation: false,
            generate_test_file: None,
            upload: UploadConfig::default(),
            download: DownloadConfig::default(),
            work_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.fragment_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "fragment_size must be greater than zero".into(),
            ));
        }
        if self.max_parts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_parts must be greater than zero".into(),
            ));
        }
        self.upload.validate()?;
        self.download.validate()?;
        Ok(())
    }

    /// Directory downloaded fragments are spooled to.
    pub fn spool_dir(&self) -> PathBuf {
        self.work_dir.join("downloaded_parts")
    }
}
