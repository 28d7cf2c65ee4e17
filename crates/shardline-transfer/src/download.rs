//! Ordered download of the fragments named by a manifest.

use std::sync::Arc;

use bytes::Bytes;
use shardline_core::{Fragment, TransferManifest, TransferReceipt};
use shardline_store::StorageClient;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::DownloadConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};

/// Fetches every fragment in a manifest, in manifest order.
///
/// A single failure aborts the whole download; there is no partial result
/// since reassembly needs every fragment.
pub struct DownloadCoordinator<S> {
    storage: Arc<S>,
    config: DownloadConfig,
}

impl<S> DownloadCoordinator<S>
where
    S: StorageClient + 'static,
{
    pub fn new(storage: Arc<S>, config: DownloadConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download everything into memory.
    pub async fn download(&self, manifest: &TransferManifest) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::with_capacity(manifest.len());
        self.download_to(manifest, |fragment| {
            fragments.push(fragment);
            Ok(())
        })
        .await?;
        Ok(fragments)
    }

    /// Download fragments and hand each to `sink` in index order.
    ///
    /// Fragment offsets follow the lengths recorded in the manifest; each
    /// fragment's length is whatever the network returned. Returns the
    /// number of bytes received.
    pub async fn download_to<F>(&self, manifest: &TransferManifest, mut sink: F) -> Result<u64>
    where
        F: FnMut(Fragment) -> Result<()>,
    {
        self.config.validate()?;
        let deadline = Deadline::start(self.config.timeout, self.config.timeout);

        let mut offset = 0u64;
        let mut received = 0u64;

        for window in manifest.receipts().chunks(self.config.parallelism) {
            let fetched = if window.len() == 1 {
                vec![fetch(&*self.storage, &window[0], self.config.verify_proof, deadline).await?]
            } else {
                self.fetch_window(window, deadline).await?
            };

            for (receipt, bytes) in window.iter().zip(fetched) {
                received += bytes.len() as u64;
                sink(Fragment::new(
                    receipt.fragment_index,
                    offset,
                    bytes.to_vec(),
                ))?;
                offset += receipt.length;
            }
        }

        info!(fragments = manifest.len(), bytes = received, "download complete");
        Ok(received)
    }

    /// Fetch a window of receipts concurrently into index-addressed slots.
    async fn fetch_window(
        &self,
        window: &[TransferReceipt],
        deadline: Deadline,
    ) -> Result<Vec<Bytes>> {
        let mut workers = JoinSet::new();
        for (slot, receipt) in window.iter().cloned().enumerate() {
            let storage = self.storage.clone();
            let verify_proof = self.config.verify_proof;
            workers.spawn(async move {
                let result = fetch(&*storage, &receipt, verify_proof, deadline).await;
                (slot, result)
            });
        }

        let mut slots: Vec<Option<Bytes>> = vec![None; window.len()];
        let mut failure: Option<(usize, TransferError)> = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((slot, Ok(bytes))) => slots[slot] = Some(bytes),
                Ok((slot, Err(e))) => {
                    if failure.as_ref().map_or(true, |(first, _)| slot < *first) {
                        failure = Some((slot, e));
                    }
                    workers.abort_all();
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    failure.get_or_insert((usize::MAX, TransferError::Worker(e.to_string())));
                    workers.abort_all();
                }
            }
        }

        if let Some((_, e)) = failure {
            return Err(e);
        }

        slots
            .into_iter()
            .zip(window)
            .map(|(bytes, receipt)| {
                bytes.ok_or_else(|| {
                    TransferError::Worker(format!(
                        "fragment {} produced no result",
                        receipt.fragment_index
                    ))
                })
            })
            .collect()
    }
}

async fn fetch<S>(
    storage: &S,
    receipt: &TransferReceipt,
    verify_proof: bool,
    deadline: Deadline,
) -> Result<Bytes>
where
    S: StorageClient + ?Sized,
{
    let index = receipt.fragment_index;
    if deadline.is_expired() {
        return Err(TransferError::Timeout { index });
    }

    debug!(fragment = index, fingerprint = %receipt.fingerprint.short(), "downloading fragment");
    let request = storage.download(&receipt.fingerprint, verify_proof, deadline.overall());
    match tokio::time::timeout_at(deadline.overall(), request).await {
        Ok(Ok(bytes)) => {
            info!(fragment = index, bytes = bytes.len(), "fragment downloaded");
            Ok(bytes)
        }
        Ok(Err(source)) => Err(TransferError::DownloadFailed { index, source }),
        Err(_) => Err(TransferError::Timeout { index }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::upload::UploadCoordinator;
    use proptest::prelude::*;
    use shardline_core::{combine, MerkleOracle};
    use shardline_store::{MemoryStorage, StoreError};
    use shardline_testkit::{
        fingerprint_of, fragments_of, pattern_bytes, seeded_bytes, DelayedStorage, FlakyStorage,
    };
    use std::time::Duration;

    async fn uploaded<S: StorageClient + 'static>(
        storage: Arc<S>,
        data: &[u8],
        fragment_size: usize,
    ) -> TransferManifest {
        let config = UploadConfig {
            batch_cooldown: Duration::ZERO,
            ..UploadConfig::default()
        };
        UploadCoordinator::new(storage, Arc::new(MerkleOracle::new()), config)
            .upload_all(fragments_of(data, fragment_size, usize::MAX))
            .await
            .unwrap()
    }

    fn parallel(parallelism: usize) -> DownloadConfig {
        DownloadConfig {
            parallelism,
            ..DownloadConfig::default()
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let data = pattern_bytes(1_000_000);
        let storage = Arc::new(MemoryStorage::new());
        let manifest = uploaded(storage.clone(), &data, 300_000).await;

        let fragments = DownloadCoordinator::new(storage, DownloadConfig::default())
            .download(&manifest)
            .await
            .unwrap();

        let offsets: Vec<u64> = fragments.iter().map(|f| f.spec().offset).collect();
        assert_eq!(offsets, vec![0, 300_000, 600_000, 900_000]);

        let mut out = Vec::new();
        assert_eq!(combine(fragments, &mut out).unwrap(), 1_000_000);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_failure_names_fragment() {
        let data = pattern_bytes(3000);
        let storage = Arc::new(FlakyStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;
        storage.fail_downloads(manifest.get(1).unwrap().fingerprint, 1);

        let err = DownloadCoordinator::new(storage, DownloadConfig::default())
            .download(&manifest)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::DownloadFailed {
                index: 1,
                source: StoreError::Network(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_proof_failure_surfaces() {
        let data = pattern_bytes(2000);
        let storage = Arc::new(MemoryStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;
        storage.tamper(&manifest.get(0).unwrap().fingerprint, vec![0u8; 1000]);

        let err = DownloadCoordinator::new(storage.clone(), DownloadConfig::default())
            .download(&manifest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::DownloadFailed {
                index: 0,
                source: StoreError::ProofInvalid(_)
            }
        ));

        // Without proof checking the tampered bytes are returned as-is.
        let config = DownloadConfig {
            verify_proof: false,
            ..DownloadConfig::default()
        };
        let fragments = DownloadCoordinator::new(storage, config)
            .download(&manifest)
            .await
            .unwrap();
        assert_eq!(fragments[0].bytes(), &[0u8; 1000][..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_window_keeps_order() {
        let data = pattern_bytes(5000);
        let storage = Arc::new(DelayedStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;
        storage.delay_download(fingerprint_of(&data[..1000]), Duration::from_secs(3));

        let mut seen = Vec::new();
        let received = DownloadCoordinator::new(storage, parallel(3))
            .download_to(&manifest, |fragment| {
                seen.push(fragment.index());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(received, 5000);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_parallel_failure_aborts() {
        let data = pattern_bytes(4000);
        let storage = Arc::new(FlakyStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;
        storage.fail_downloads(manifest.get(2).unwrap().fingerprint, 1);

        let err = DownloadCoordinator::new(storage, parallel(4))
            .download(&manifest)
            .await
            .unwrap_err();
        assert_eq!(err.fragment_index(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_timeout() {
        let data = pattern_bytes(2000);
        let storage = Arc::new(DelayedStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;
        storage.delay_download(manifest.get(1).unwrap().fingerprint, Duration::from_secs(120));

        let config = DownloadConfig {
            timeout: Duration::from_secs(60),
            ..DownloadConfig::default()
        };
        let err = DownloadCoordinator::new(storage, config)
            .download(&manifest)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout { index: 1 }));
    }

    #[tokio::test]
    async fn test_sink_error_stops_download() {
        let data = pattern_bytes(3000);
        let storage = Arc::new(MemoryStorage::new());
        let manifest = uploaded(storage.clone(), &data, 1000).await;

        let mut calls = 0;
        let err = DownloadCoordinator::new(storage, DownloadConfig::default())
            .download_to(&manifest, |_| {
                calls += 1;
                Err(TransferError::Worker("sink full".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Worker(_)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_empty_manifest() {
        let storage = Arc::new(MemoryStorage::new());
        let fragments = DownloadCoordinator::new(storage, DownloadConfig::default())
            .download(&TransferManifest::new())
            .await
            .unwrap();
        assert!(fragments.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_upload_download_combine_reproduces_source(
            seed in any::<u64>(),
            len in 0usize..20_000,
            fragment_size in 1usize..5_000,
            parallelism in 1usize..4,
        ) {
            let data = seeded_bytes(seed, len);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let out = runtime.block_on(async {
                let storage = Arc::new(MemoryStorage::new());
                let manifest = uploaded(storage.clone(), &data, fragment_size).await;
                let fragments = DownloadCoordinator::new(storage, parallel(parallelism))
                    .download(&manifest)
                    .await
                    .unwrap();
                let mut out = Vec::new();
                combine(fragments, &mut out).unwrap();
                out
            });

            prop_assert_eq!(out, data);
        }
    }
}
