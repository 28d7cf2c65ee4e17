//! StorageClient trait: the abstract interface to the storage network.
//!
//! Node selection, wire protocol and chain submission live behind this
//! trait. The orchestrator only needs upload-by-bytes and
//! download-by-fingerprint.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shardline_core::{Fingerprint, TransactionId};
use tokio::time::Instant;

use crate::error::Result;

/// Confirmation strength requested for a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityMode {
    /// Return once the transaction is packed into a block.
    #[default]
    TransactionPacked,
    /// Wait until the file is finalized across replicas.
    FileFinalized,
}

/// Per-upload options passed through to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Number of replicas the network should keep.
    pub replica_count: u32,
    /// Node selection method, interpreted by the backend (e.g. `"min"`).
    pub method: String,
    /// Only route to trusted nodes.
    pub trusted_nodes_only: bool,
    pub finality: FinalityMode,
    /// Retries the backend may perform internally per call.
    pub retries: u32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            replica_count: 1,
            method: "min".to_string(),
            trusted_nodes_only: true,
            finality: FinalityMode::TransactionPacked,
            retries: 3,
        }
    }
}

/// What the network hands back for an accepted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub transaction_id: TransactionId,
    /// True when the requested finality was reached before returning.
    pub confirmed: bool,
}

/// A submission as recorded by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub fingerprint: Fingerprint,
    pub length: u64,
    pub options: UploadOptions,
}

/// The StorageClient trait: async interface to a content-addressed network.
///
/// # Design Notes
///
/// - `deadline` is the earliest instant by which the caller gives up. The
///   caller also enforces it, so backends may ignore it.
/// - `download` with `verify_proof` asks the backend to validate
///   network-side proofs. This is in addition to, not instead of, the
///   client-side fingerprint check.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Upload one fragment's bytes.
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        deadline: Instant,
    ) -> Result<TransactionHandle>;

    /// Fetch a fragment's bytes by fingerprint.
    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        deadline: Instant,
    ) -> Result<Bytes>;
}

#[async_trait]
impl<S: StorageClient + ?Sized> StorageClient for Arc<S> {
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        deadline: Instant,
    ) -> Result<TransactionHandle> {
        (**self).upload(data, options, deadline).await
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        deadline: Instant,
    ) -> Result<Bytes> {
        (**self).download(fingerprint, verify_proof, deadline).await
    }
}

/// Derive a transaction id from a fingerprint and a per-backend nonce.
pub fn derive_transaction_id(fingerprint: &Fingerprint, nonce: u64) -> TransactionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"shardline-tx-v0:");
    hasher.update(fingerprint.as_bytes());
    hasher.update(b":");
    hasher.update(&nonce.to_le_bytes());
    TransactionId(*hasher.finalize().as_bytes())
}
