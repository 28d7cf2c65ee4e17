//! # Shardline
//!
//! Move a large file through a remote storage network in fixed-size
//! fragments, then prove the round trip was lossless.
//!
//! ## Overview
//!
//! A run walks one file through six stages:
//!
//! - **Fragment**: split the source into at most `max_parts` pieces
//! - **Upload**: submit fragments in batches, retrying each with backoff
//! - **Download**: fetch every fragment named by the manifest
//! - **Verify**: compare original and retrieved fingerprints, per fragment
//! - **Combine**: write the retrieved fragments back out, in index order
//!
//! (plus an optional **Generate** stage that writes a deterministic test
//! file first). The first failing stage halts the run and is named in the
//! error.
//!
//! ## Key Types
//!
//! - [`PipelineDriver`]: the state machine that runs the stages
//! - [`PipelineConfig`]: fragment geometry plus upload and download policy
//! - [`TransferManifest`]: ordered receipts, one per uploaded fragment
//! - [`StageFailure`]: which stage failed, why, and any partial manifest
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use shardline::{PipelineConfig, PipelineDriver};
//! use shardline::store::SqliteStorage;
//!
//! async fn example() {
//!     let storage = Arc::new(SqliteStorage::open("fragments.db").unwrap());
//!     let mut driver = PipelineDriver::with_storage(storage, PipelineConfig::default());
//!
//!     let report = driver
//!         .run(Path::new("input.bin"), Path::new("output/final_file.bin"))
//!         .await
//!         .unwrap();
//!
//!     for receipt in &report.manifest {
//!         println!("{} {}", receipt.fragment_index, receipt.transaction_id.short());
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `shardline::core` - Fragments, fingerprints, manifests, verification
//! - `shardline::store` - The storage client seam, in-memory and SQLite
//! - `shardline::transfer` - Upload and download coordination

pub mod config;
pub mod error;
pub mod pipeline;
pub mod spool;

// Re-export component crates
pub use shardline_core as core;
pub use shardline_store as store;
pub use shardline_transfer as transfer;

// Re-export main types for convenience
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, Stage, StageFailure};
pub use pipeline::{PipelineDriver, PipelineReport, PipelineState};
pub use spool::FragmentSpool;

// Re-export commonly used component types
pub use shardline_core::{
    Fingerprint, FingerprintOracle, MerkleOracle, TransactionId, TransferManifest,
    TransferReceipt, VerificationResult,
};
pub use shardline_store::{FinalityMode, StorageClient, UploadOptions};
pub use shardline_transfer::{DownloadConfig, UploadConfig};
