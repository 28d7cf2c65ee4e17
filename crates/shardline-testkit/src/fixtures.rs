//! Test fixtures and storage doubles.
//!
//! Wrappers around any [`StorageClient`] that inject failures, delays, or
//! corruption for chosen fragments. Fragments are chosen by fingerprint,
//! computed with the default [`MerkleOracle`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use shardline_core::{split, Fingerprint, FingerprintOracle, Fragment, MerkleOracle, SourceStream};
use shardline_store::{MemoryStorage, Result, StorageClient, StoreError, TransactionHandle, UploadOptions};
use tokio::time::{Duration, Instant};

/// Fingerprint `data` with the default oracle.
pub fn fingerprint_of(data: &[u8]) -> Fingerprint {
    MerkleOracle::new()
        .fingerprint(data)
        .expect("in-memory fingerprint cannot fail")
}

/// Deterministic test content: byte `i` is `i mod 256`.
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Split `data` eagerly into fragments.
pub fn fragments_of(data: &[u8], fragment_size: usize, max_parts: usize) -> Vec<Fragment> {
    split(SourceStream::from_bytes(data.to_vec()), fragment_size, max_parts)
        .expect("valid fragment parameters")
        .collect::<shardline_core::Result<_>>()
        .expect("in-memory source cannot fail")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one scheduled failure for `fingerprint`, if any remain.
///
/// `u32::MAX` means fail forever.
fn take_failure(failures: &Mutex<HashMap<Fingerprint, u32>>, fingerprint: &Fingerprint) -> bool {
    match lock(failures).get_mut(fingerprint) {
        Some(remaining) if *remaining > 0 => {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            true
        }
        _ => false,
    }
}

/// One call to [`FlakyStorage::upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAttempt {
    pub fingerprint: Fingerprint,
    pub at: Instant,
    pub deadline: Instant,
}

/// Storage that fails chosen fragments a chosen number of times.
pub struct FlakyStorage<S = MemoryStorage> {
    inner: S,
    upload_failures: Mutex<HashMap<Fingerprint, u32>>,
    download_failures: Mutex<HashMap<Fingerprint, u32>>,
    attempts: Mutex<Vec<UploadAttempt>>,
}

impl FlakyStorage<MemoryStorage> {
    pub fn new() -> Self {
        Self::wrap(MemoryStorage::new())
    }
}

impl Default for FlakyStorage<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> FlakyStorage<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            upload_failures: Mutex::new(HashMap::new()),
            download_failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `times` uploads of `fingerprint`.
    pub fn fail_uploads(&self, fingerprint: Fingerprint, times: u32) {
        lock(&self.upload_failures).insert(fingerprint, times);
    }

    /// Fail every upload of `fingerprint`.
    pub fn fail_uploads_always(&self, fingerprint: Fingerprint) {
        self.fail_uploads(fingerprint, u32::MAX);
    }

    /// Fail the next `times` downloads of `fingerprint`.
    pub fn fail_downloads(&self, fingerprint: Fingerprint, times: u32) {
        lock(&self.download_failures).insert(fingerprint, times);
    }

    /// Every upload call seen, in order.
    pub fn attempts(&self) -> Vec<UploadAttempt> {
        lock(&self.attempts).clone()
    }

    /// Instants at which `fingerprint` was attempted.
    pub fn attempts_for(&self, fingerprint: &Fingerprint) -> Vec<Instant> {
        lock(&self.attempts)
            .iter()
            .filter(|a| a.fingerprint == *fingerprint)
            .map(|a| a.at)
            .collect()
    }
}

#[async_trait]
impl<S: StorageClient> StorageClient for FlakyStorage<S> {
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        deadline: Instant,
    ) -> Result<TransactionHandle> {
        let fingerprint = fingerprint_of(data);
        lock(&self.attempts).push(UploadAttempt {
            fingerprint,
            at: Instant::now(),
            deadline,
        });

        if take_failure(&self.upload_failures, &fingerprint) {
            return Err(StoreError::Network(format!(
                "injected upload failure for {}",
                fingerprint.short()
            )));
        }
        self.inner.upload(data, options, deadline).await
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        deadline: Instant,
    ) -> Result<Bytes> {
        if take_failure(&self.download_failures, fingerprint) {
            return Err(StoreError::Network(format!(
                "injected download failure for {}",
                fingerprint.short()
            )));
        }
        self.inner.download(fingerprint, verify_proof, deadline).await
    }
}

/// Storage that holds chosen calls for a fixed time before answering.
///
/// Records upload completion order, for ordering tests.
pub struct DelayedStorage<S = MemoryStorage> {
    inner: S,
    upload_delays: Mutex<HashMap<Fingerprint, Duration>>,
    download_delays: Mutex<HashMap<Fingerprint, Duration>>,
    completed: Mutex<Vec<Fingerprint>>,
}

impl DelayedStorage<MemoryStorage> {
    pub fn new() -> Self {
        Self::wrap(MemoryStorage::new())
    }
}

impl Default for DelayedStorage<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> DelayedStorage<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            upload_delays: Mutex::new(HashMap::new()),
            download_delays: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn delay_upload(&self, fingerprint: Fingerprint, delay: Duration) {
        lock(&self.upload_delays).insert(fingerprint, delay);
    }

    pub fn delay_download(&self, fingerprint: Fingerprint, delay: Duration) {
        lock(&self.download_delays).insert(fingerprint, delay);
    }

    /// Fingerprints of successful uploads, in completion order.
    pub fn completed_uploads(&self) -> Vec<Fingerprint> {
        lock(&self.completed).clone()
    }
}

#[async_trait]
impl<S: StorageClient> StorageClient for DelayedStorage<S> {
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        deadline: Instant,
    ) -> Result<TransactionHandle> {
        let fingerprint = fingerprint_of(data);
        let delay = lock(&self.upload_delays).get(&fingerprint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let handle = self.inner.upload(data, options, deadline).await?;
        lock(&self.completed).push(fingerprint);
        Ok(handle)
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        deadline: Instant,
    ) -> Result<Bytes> {
        let delay = lock(&self.download_delays).get(fingerprint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.download(fingerprint, verify_proof, deadline).await
    }
}

/// Storage that flips a byte of chosen fragments on the way back.
///
/// The stored copy stays intact, so network-side proof checks pass; only a
/// client-side fingerprint comparison notices.
pub struct CorruptingStorage<S = MemoryStorage> {
    inner: S,
    targets: Mutex<HashSet<Fingerprint>>,
}

impl CorruptingStorage<MemoryStorage> {
    pub fn new() -> Self {
        Self::wrap(MemoryStorage::new())
    }
}

impl Default for CorruptingStorage<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CorruptingStorage<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            targets: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn corrupt(&self, fingerprint: Fingerprint) {
        lock(&self.targets).insert(fingerprint);
    }
}

#[async_trait]
impl<S: StorageClient> StorageClient for CorruptingStorage<S> {
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        deadline: Instant,
    ) -> Result<TransactionHandle> {
        self.inner.upload(data, options, deadline).await
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        deadline: Instant,
    ) -> Result<Bytes> {
        let bytes = self.inner.download(fingerprint, verify_proof, deadline).await?;
        if !lock(&self.targets).contains(fingerprint) {
            return Ok(bytes);
        }

        let mut data = bytes.to_vec();
        match data.first_mut() {
            Some(first) => *first ^= 0xFF,
            None => data.push(0xFF),
        }
        Ok(Bytes::from(data))
    }
}
