//! # Shardline Core
//!
//! Pure primitives for fragmented large-file transfer: splitting a byte
//! stream into fixed-size fragments, fingerprinting them, recording what was
//! stored, verifying what came back, and stitching it together again.
//!
//! This crate contains no networking and no async. Everything here is
//! synchronous computation over readers, writers and byte buffers.
//!
//! ## Key Types
//!
//! - [`Fragmenter`] - Lazy, restartable splitter over a [`SourceStream`]
//! - [`Fragment`] / [`FragmentSpec`] - A contiguous slice of the source
//! - [`Fingerprint`] - Content digest produced by a [`FingerprintOracle`]
//! - [`TransferManifest`] - Index-aligned receipts, the handle for retrieval
//! - [`IntegrityVerifier`] - Recomputes and compares fingerprints
//! - [`Reassembler`] - Writes verified fragments back out in order
//!
//! ## Fragment Layout
//!
//! ```text
//! offset 0                                                        L
//!   |--- F ---|--- F ---|--- F ---| ... |--- F ---|-- L mod F --|
//!   index 0    index 1   index 2         index n-2  index n-1
//! ```
//!
//! At most `max_parts` fragments are produced. Sizing `F × max_parts < L`
//! leaves the tail of the source unfragmented; see [`fragment_capacity`].

pub mod error;
pub mod fragment;
pub mod manifest;
pub mod oracle;
pub mod pool;
pub mod reassemble;
pub mod source;
pub mod types;
pub mod verify;

pub use error::{CoreError, Result};
pub use fragment::{fragment_capacity, plan_fragments, split, Fragment, FragmentSpec, Fragmenter};
pub use manifest::{ManifestFormat, TransferManifest, TransferReceipt};
pub use oracle::{FingerprintOracle, MerkleOracle, DEFAULT_LEAF_SIZE};
pub use pool::BufferPool;
pub use reassemble::{combine, Reassembler};
pub use source::{generate_test_file, SourceStream};
pub use types::{Fingerprint, TransactionId};
pub use verify::{ensure_intact, IntegrityVerifier, VerificationResult};
