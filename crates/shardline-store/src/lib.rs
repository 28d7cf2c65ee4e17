//! # Shardline Store
//!
//! The storage-network seam for Shardline. The orchestrator talks to the
//! network only through the [`StorageClient`] trait: upload a fragment and get
//! a transaction handle back, download a fragment by fingerprint.
//!
//! ## Key Types
//!
//! - [`StorageClient`] - Async trait for all network operations
//! - [`UploadOptions`] - Replica count, node selection, finality
//! - [`MemoryStorage`] - In-memory content-addressed network double
//! - [`SqliteStorage`] - Persistent local content-addressed store
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shardline_store::{SqliteStorage, StorageClient, UploadOptions};
//! use tokio::time::{Duration, Instant};
//!
//! async fn example() {
//!     let storage = SqliteStorage::open("fragments.db").unwrap();
//!     let deadline = Instant::now() + Duration::from_secs(60);
//!
//!     let handle = storage
//!         .upload(b"fragment bytes", &UploadOptions::default(), deadline)
//!         .await
//!         .unwrap();
//!     println!("submitted {}", handle.transaction_id);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Content addressed**: fragments are keyed by their fingerprint, so
//!   re-uploading identical bytes stores them once but still records a
//!   new transaction.
//! - **Proof checking**: with `verify_proof`, backends recompute the
//!   fingerprint of what they hand back and refuse to return mismatches.
//! - **Deadlines**: callers enforce deadlines; backends receive the deadline
//!   so they can bound their own I/O.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{
    derive_transaction_id, FinalityMode, StorageClient, TransactionHandle, TransactionRecord,
    UploadOptions,
};
