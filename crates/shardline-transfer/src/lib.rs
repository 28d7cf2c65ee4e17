//! # Shardline Transfer
//!
//! Moves fragments to and from a storage network.
//!
//! ## Overview
//!
//! [`UploadCoordinator`] pushes fragments in batches, fingerprinting each one
//! before it leaves and retrying failed attempts with capped exponential
//! backoff. [`DownloadCoordinator`] fetches them back in manifest order.
//! Both run under an overall deadline fixed when they start.
//!
//! ## Key Properties
//!
//! - **Index aligned**: receipts and downloaded fragments always come out in
//!   fragment order, whatever order the network answers in
//! - **Bounded retries**: `max_retries` attempts per fragment, waiting
//!   0, 1, 2, 4, ... seconds (capped at 30) between them
//! - **Resumable**: a failed upload returns the manifest prefix it built,
//!   which [`UploadCoordinator::resume`] continues from
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shardline_core::{split, MerkleOracle, SourceStream};
//! use shardline_store::MemoryStorage;
//! use shardline_transfer::{DownloadConfig, DownloadCoordinator, UploadConfig, UploadCoordinator};
//!
//! async fn example() {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let oracle = Arc::new(MerkleOracle::new());
//!
//!     let source = SourceStream::open("large.bin").unwrap();
//!     let fragments = split(source, 300_000, 10).unwrap();
//!
//!     let upload = UploadCoordinator::new(storage.clone(), oracle, UploadConfig::default());
//!     let manifest = match upload.upload(fragments).await {
//!         Ok(manifest) => manifest,
//!         Err(partial) => {
//!             eprintln!("stopped after {} fragments: {}", partial.manifest.len(), partial.error);
//!             return;
//!         }
//!     };
//!
//!     let download = DownloadCoordinator::new(storage, DownloadConfig::default());
//!     let fragments = download.download(&manifest).await.unwrap();
//!     println!("retrieved {} fragments", fragments.len());
//! }
//! ```
//!
//! ## Retry Timeline
//!
//! ```text
//! attempt   1      2        3          4
//!           |--x   |--x     |--x       |--ok
//!           0s     +1s      +2s        +4s
//! ```

pub mod config;
pub mod deadline;
pub mod download;
pub mod error;
pub mod retry;
pub mod upload;

pub use config::{DownloadConfig, UploadConfig};
pub use deadline::Deadline;
pub use download::DownloadCoordinator;
pub use error::{PartialUpload, Result, TransferError, UploadResult};
pub use retry::{backoff_delay, run_with_retry, AttemptOutcome, RetryPolicy, MAX_BACKOFF};
pub use upload::UploadCoordinator;
