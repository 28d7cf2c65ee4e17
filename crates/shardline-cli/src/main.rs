//! Shardline CLI
//!
//! Split a large file, push it through fragment storage, pull it back and
//! prove the copy is exact.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Config;
use shardline::core::generate_test_file;
use shardline::store::SqliteStorage;
use shardline::{PipelineDriver, PipelineReport, StageFailure, TransferManifest};

/// Shardline - fragmented large-file transfer with end-to-end verification
#[derive(Parser)]
#[command(name = "shardline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, split, upload, download, verify and combine in one go
    Run {
        /// Source file (overrides file.input_file)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Split and upload, writing the manifest
    Upload {
        /// Source file (overrides file.input_file)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the manifest
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Partial manifest from an aborted upload
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Download from a manifest, verify and combine
    Download {
        /// Manifest written by `upload`
        #[arg(short, long)]
        manifest: PathBuf,

        /// Output file (defaults to <output_directory>/final_file.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Original file to verify against; without it the manifest
        /// fingerprints are used
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Write the deterministic test file
    Generate {
        /// Output file (overrides file.input_file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Size in bytes (overrides file.test_file_size)
        #[arg(short, long)]
        size: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Initialize logging; RUST_LOG wins over both
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config::is_missing_default(&cli.config) {
        tracing::debug!(path = %cli.config.display(), "no config file, using defaults");
    }

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Run { input } => {
            let input = input.unwrap_or_else(|| config.file.input_file.clone());
            run_pipeline(&input, &config).await?;
        }
        Commands::Upload {
            input,
            manifest,
            resume,
        } => {
            let input = input.unwrap_or_else(|| config.file.input_file.clone());
            let manifest = manifest.unwrap_or_else(|| default_manifest_path(&config));
            upload(&input, &manifest, resume.as_deref(), &config).await?;
        }
        Commands::Download {
            manifest,
            output,
            source,
        } => {
            let output = output.unwrap_or_else(|| config.final_file());
            download(&manifest, &output, source.as_deref(), &config).await?;
        }
        Commands::Generate { output, size } => {
            let output = output.unwrap_or_else(|| config.file.input_file.clone());
            let size = size.unwrap_or(config.file.test_file_size);
            generate(&output, size)?;
        }
    }

    Ok(())
}

fn default_manifest_path(config: &Config) -> PathBuf {
    config.file.output_directory.join("manifest.json")
}

fn partial_manifest_path(config: &Config) -> PathBuf {
    config.file.output_directory.join("manifest.partial.json")
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<SqliteStorage>> {
    let path = &config.storage.database;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let storage = SqliteStorage::open(path)
        .with_context(|| format!("opening storage at {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Full pipeline
async fn run_pipeline(input: &Path, config: &Config) -> anyhow::Result<()> {
    let output = config.final_file();
    let storage = open_storage(config)?;
    let pipeline = config.pipeline();

    println!("Input: {}", input.display());
    println!(
        "Fragment size: {} bytes ({:.2} MB)",
        pipeline.fragment_size,
        pipeline.fragment_size as f64 / (1024.0 * 1024.0)
    );
    println!("Max parts: {}", pipeline.max_parts);
    println!("Batch size: {}", pipeline.upload.batch_size);
    println!("Method: {}", pipeline.upload.options.method);
    println!("Expected replicas: {}", pipeline.upload.options.replica_count);
    println!();

    let mut driver = PipelineDriver::with_storage(storage, pipeline);
    let report = match driver.run(input, &output).await {
        Ok(report) => report,
        Err(failure) => return Err(handle_failure(failure, config)),
    };

    print_report(&report);
    Ok(())
}

/// Split and upload
async fn upload(
    input: &Path,
    manifest_path: &Path,
    resume: Option<&Path>,
    config: &Config,
) -> anyhow::Result<()> {
    let partial = resume
        .map(|path| {
            TransferManifest::load(path)
                .with_context(|| format!("loading partial manifest {}", path.display()))
        })
        .transpose()?;
    if let Some(partial) = &partial {
        tracing::info!(fragments = partial.len(), "resuming upload");
    }

    let storage = open_storage(config)?;
    let mut driver = PipelineDriver::with_storage(storage, config.pipeline());
    let manifest = match driver.upload_only(input, partial).await {
        Ok(manifest) => manifest,
        Err(failure) => return Err(handle_failure(failure, config)),
    };

    save_manifest(&manifest, manifest_path)?;
    print_upload_summary(&manifest);
    println!("Manifest: {}", manifest_path.display());
    Ok(())
}

/// Download, verify and combine
async fn download(
    manifest_path: &Path,
    output: &Path,
    source: Option<&Path>,
    config: &Config,
) -> anyhow::Result<()> {
    let manifest = TransferManifest::load(manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
    let storage = open_storage(config)?;

    let mut driver = PipelineDriver::with_storage(storage, config.pipeline());
    let report = match driver.download_only(&manifest, source, output).await {
        Ok(report) => report,
        Err(failure) => return Err(handle_failure(failure, config)),
    };

    print_report(&report);
    Ok(())
}

fn generate(output: &Path, size: u64) -> anyhow::Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let written = generate_test_file(output, size)?;
    println!("Generated {} ({} bytes)", output.display(), written);
    Ok(())
}

/// Save any partial manifest so the upload can be resumed.
fn handle_failure(failure: StageFailure, config: &Config) -> anyhow::Error {
    if let Some(partial) = &failure.partial_manifest {
        let path = partial_manifest_path(config);
        match save_manifest(partial, &path) {
            Ok(()) => {
                eprintln!(
                    "{} of the fragments were uploaded; resume with: shardline upload --resume {}",
                    partial.len(),
                    path.display()
                );
            }
            Err(e) => tracing::error!(error = %e, "could not save partial manifest"),
        }
    }
    anyhow::Error::new(failure)
}

fn save_manifest(manifest: &TransferManifest, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    manifest
        .save(path)
        .with_context(|| format!("writing manifest {}", path.display()))
}

fn print_upload_summary(manifest: &TransferManifest) {
    println!("Upload summary ({} parts):", manifest.len());
    for receipt in manifest {
        println!(
            "  Part {}: Tx={}..., Root={}...",
            receipt.fragment_index,
            &receipt.transaction_id.to_hex()[..10],
            &receipt.fingerprint.to_hex()[..10]
        );
    }
}

fn print_report(report: &PipelineReport) {
    print_upload_summary(&report.manifest);
    println!();
    println!("Verification:");
    for result in &report.verification {
        println!(
            "  Part {}: match={} ({}...)",
            result.fragment_index,
            result.matched,
            &result.actual.to_hex()[..10]
        );
    }
    println!();
    println!(
        "Final file: {} ({} bytes)",
        report.output.display(),
        report.bytes_written
    );
}
