//! In-memory implementation of the StorageClient trait.
//!
//! This is primarily for testing. It behaves like a content-addressed
//! network that answers instantly and never loses data.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use shardline_core::{Fingerprint, FingerprintOracle, MerkleOracle};
use tokio::time::Instant;

use crate::error::{Result, StoreError};
use crate::traits::{
    derive_transaction_id, FinalityMode, StorageClient, TransactionHandle, TransactionRecord,
    UploadOptions,
};

/// In-memory storage network.
///
/// All data is lost when the value is dropped. Thread-safe via RwLock.
pub struct MemoryStorage<O = MerkleOracle> {
    oracle: O,
    inner: RwLock<MemoryStorageInner>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Fragment payloads indexed by fingerprint.
    fragments: HashMap<Fingerprint, Bytes>,

    /// Every accepted submission, in order.
    transactions: Vec<TransactionRecord>,
}

impl MemoryStorage<MerkleOracle> {
    /// Create an empty store fingerprinting with the default Merkle oracle.
    pub fn new() -> Self {
        Self::with_oracle(MerkleOracle::new())
    }
}

impl Default for MemoryStorage<MerkleOracle> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: FingerprintOracle> MemoryStorage<O> {
    /// Create an empty store using `oracle` to address content.
    pub fn with_oracle(oracle: O) -> Self {
        Self {
            oracle,
            inner: RwLock::new(MemoryStorageInner::default()),
        }
    }

    /// Number of distinct fragments stored.
    pub fn len(&self) -> usize {
        self.read().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.read().fragments.contains_key(fingerprint)
    }

    /// All submissions in arrival order.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.read().transactions.clone()
    }

    /// Overwrite the bytes stored under `fingerprint`.
    ///
    /// Simulates corruption at rest.
    pub fn tamper(&self, fingerprint: &Fingerprint, bytes: impl Into<Bytes>) {
        self.write().fragments.insert(*fingerprint, bytes.into());
    }

    /// Drop the fragment stored under `fingerprint`.
    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        self.write().fragments.remove(fingerprint).is_some()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryStorageInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryStorageInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<O: FingerprintOracle> StorageClient for MemoryStorage<O> {
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        _deadline: Instant,
    ) -> Result<TransactionHandle> {
        let fingerprint = self.oracle.fingerprint(data)?;

        let mut inner = self.write();
        inner
            .fragments
            .entry(fingerprint)
            .or_insert_with(|| Bytes::copy_from_slice(data));

        let transaction_id = derive_transaction_id(&fingerprint, inner.transactions.len() as u64);
        inner.transactions.push(TransactionRecord {
            transaction_id,
            fingerprint,
            length: data.len() as u64,
            options: options.clone(),
        });

        Ok(TransactionHandle {
            transaction_id,
            confirmed: options.finality == FinalityMode::FileFinalized,
        })
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        _deadline: Instant,
    ) -> Result<Bytes> {
        let bytes = self
            .read()
            .fragments
            .get(fingerprint)
            .cloned()
            .ok_or(StoreError::NotFound(*fingerprint))?;

        if verify_proof && self.oracle.fingerprint(&bytes)? != *fingerprint {
            return Err(StoreError::ProofInvalid(*fingerprint));
        }

        Ok(bytes)
    }
}
