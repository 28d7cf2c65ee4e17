//! Configuration file for the Shardline CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shardline::{DownloadConfig, FinalityMode, PipelineConfig, UploadConfig, UploadOptions};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_PATH: &str = "shardline.json";

/// Shardline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Local storage backend
    pub storage: StorageConfig,
    /// Source file and fragment geometry
    pub file: FileConfig,
    /// Upload policy
    pub upload: UploadSection,
    /// Download policy
    pub download: DownloadSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database standing in for the storage network
    pub database: PathBuf,
}

/// File configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub input_file: PathBuf,
    pub output_directory: PathBuf,
    /// Fragment size in bytes
    pub fragment_size: usize,
    pub number_of_parts: usize,
    /// Accept inputs larger than `fragment_size * number_of_parts`
    pub allow_truncation: bool,
    pub generate_test_file: bool,
    pub test_file_size: u64,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub expected_replica: u32,
    pub method: String,
    pub full_trusted: bool,
    /// Wait for file finality instead of transaction packing
    pub file_finalized: bool,
    pub max_retries: u32,
    pub timeout_minutes: u64,
    pub batch_size: usize,
    pub batch_cooldown_seconds: u64,
    /// Upload the fragments of a batch concurrently
    pub parallel: bool,
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub verify_proof: bool,
    pub timeout_minutes: u64,
    /// Fragments fetched concurrently
    pub parallelism: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("shardline.db"),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("input.bin"),
            output_directory: PathBuf::from("output"),
            fragment_size: 4 * 1024 * 1024, // 4 MiB
            number_of_parts: 10,
            allow_truncation: false,
            generate_test_file: false,
            test_file_size: 40 * 1024 * 1024,
        }
    }
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            expected_replica: 1,
            method: "min".to_string(),
            full_trusted: true,
            file_finalized: false,
            max_retries: 3,
            timeout_minutes: 30,
            batch_size: 5,
            batch_cooldown_seconds: 5,
            parallel: false,
        }
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            verify_proof: true,
            timeout_minutes: 30,
            parallelism: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// True when `path` is the implicit config file and it does not exist.
pub fn is_missing_default(path: &Path) -> bool {
    path == Path::new(DEFAULT_PATH) && !path.exists()
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Load `path`. Only a missing [`DEFAULT_PATH`] falls back to defaults;
    /// any other path must exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if is_missing_default(path) {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.file.fragment_size == 0 {
            anyhow::bail!("file.fragment_size must be greater than zero");
        }
        if self.file.number_of_parts == 0 {
            anyhow::bail!("file.number_of_parts must be greater than zero");
        }
        if self.upload.batch_size == 0 {
            anyhow::bail!("upload.batch_size must be at least 1");
        }
        if self.upload.timeout_minutes == 0 || self.download.timeout_minutes == 0 {
            anyhow::bail!("timeout_minutes must be greater than zero");
        }
        if self.download.parallelism == 0 {
            anyhow::bail!("download.parallelism must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Where the reassembled file is written.
    pub fn final_file(&self) -> PathBuf {
        self.file.output_directory.join("final_file.bin")
    }

    /// Translate into the library's pipeline settings.
    pub fn pipeline(&self) -> PipelineConfig {
        let finality = if self.upload.file_finalized {
            FinalityMode::FileFinalized
        } else {
            FinalityMode::TransactionPacked
        };

        PipelineConfig {
            fragment_size: self.file.fragment_size,
            max_parts: self.file.number_of_parts,
            allow_truncation: self.file.allow_truncation,
            generate_test_file: self
                .file
                .generate_test_file
                .then_some(self.file.test_file_size),
            upload: UploadConfig {
                batch_size: self.upload.batch_size,
                max_retries: self.upload.max_retries,
                attempt_timeout: minutes(self.upload.timeout_minutes),
                overall_timeout: minutes(self.upload.timeout_minutes),
                batch_cooldown: Duration::from_secs(self.upload.batch_cooldown_seconds),
                parallel_within_batch: self.upload.parallel,
                options: UploadOptions {
                    replica_count: self.upload.expected_replica,
                    method: self.upload.method.clone(),
                    trusted_nodes_only: self.upload.full_trusted,
                    finality,
                    ..UploadOptions::default()
                },
            },
            download: DownloadConfig {
                verify_proof: self.download.verify_proof,
                timeout: minutes(self.download.timeout_minutes),
                parallelism: self.download.parallelism,
            },
            work_dir: self.file.output_directory.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.file.fragment_size, 4 * 1024 * 1024);
        assert_eq!(config.file.number_of_parts, 10);
        assert_eq!(config.upload.batch_size, 5);
        assert!(config.download.verify_proof);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.file.number_of_parts = 0;
        assert!(config.validate().is_err());

        config.file.number_of_parts = 4;
        config.upload.batch_size = 0;
        assert!(config.validate().is_err());

        config.upload.batch_size = 1;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_original_layout_parses() {
        let json = r#"{
            "file": {
                "input_file": "data/input.bin",
                "output_directory": "out",
                "fragment_size": 300000,
                "number_of_parts": 4,
                "generate_test_file": true,
                "test_file_size": 1000000
            },
            "upload": {
                "expected_replica": 2,
                "method": "random",
                "full_trusted": false,
                "max_retries": 5,
                "timeout_minutes": 10,
                "batch_size": 2
            },
            "download": { "verify_proof": false, "timeout_minutes": 15 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        let pipeline = config.pipeline();
        assert_eq!(pipeline.fragment_size, 300_000);
        assert_eq!(pipeline.max_parts, 4);
        assert_eq!(pipeline.generate_test_file, Some(1_000_000));
        assert_eq!(pipeline.upload.max_retries, 5);
        assert_eq!(pipeline.upload.overall_timeout, Duration::from_secs(600));
        assert_eq!(pipeline.upload.options.replica_count, 2);
        assert!(!pipeline.upload.options.trusted_nodes_only);
        assert!(!pipeline.download.verify_proof);
        assert_eq!(pipeline.download.timeout, Duration::from_secs(900));
        assert_eq!(config.final_file(), PathBuf::from("out/final_file.bin"));
        pipeline.validate().unwrap();
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        assert!(!Path::new(DEFAULT_PATH).exists());
        let config = Config::load_or_default(DEFAULT_PATH).unwrap();
        assert_eq!(config.storage.database, PathBuf::from("shardline.db"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(!is_missing_default(&path));
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{ "upload": { "batch_size": 2 } }"#).unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.upload.batch_size, 2);
        assert_eq!(config.file.number_of_parts, 10);
    }
}
