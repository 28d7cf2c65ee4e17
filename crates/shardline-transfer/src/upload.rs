//! Batched upload with per-fragment retry.

use std::sync::Arc;

use shardline_core::{
    CoreError, FingerprintOracle, Fragment, Result as CoreResult, TransferManifest,
    TransferReceipt,
};
use shardline_store::{StorageClient, UploadOptions};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::deadline::Deadline;
use crate::error::{PartialUpload, Result, TransferError, UploadResult};
use crate::retry::{run_with_retry, RetryPolicy};

/// Uploads fragments in batches and builds the transfer manifest.
///
/// Batches run strictly one after another with a cooldown in between.
/// Within a batch fragments go sequentially, or concurrently when
/// `parallel_within_batch` is set; either way receipts land in the manifest
/// in fragment index order.
pub struct UploadCoordinator<S, O> {
    storage: Arc<S>,
    oracle: Arc<O>,
    config: UploadConfig,
}

impl<S, O> UploadCoordinator<S, O>
where
    S: StorageClient + 'static,
    O: FingerprintOracle + 'static,
{
    pub fn new(storage: Arc<S>, oracle: Arc<O>, config: UploadConfig) -> Self {
        Self {
            storage,
            oracle,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `fragments` (in index order, starting at 0).
    ///
    /// On failure the error carries the manifest of everything uploaded
    /// before it. Nothing already uploaded is rolled back.
    pub async fn upload<I>(&self, fragments: I) -> UploadResult
    where
        I: IntoIterator<Item = CoreResult<Fragment>>,
    {
        self.resume(TransferManifest::new(), fragments).await
    }

    /// Upload fragments that are already in memory.
    pub async fn upload_all(&self, fragments: Vec<Fragment>) -> UploadResult {
        self.upload(fragments.into_iter().map(Ok)).await
    }

    /// Continue an aborted upload.
    ///
    /// `fragments` is the full sequence again; fragments whose index is
    /// already covered by `partial` are checked against their receipt and
    /// skipped.
    pub async fn resume<I>(&self, partial: TransferManifest, fragments: I) -> UploadResult
    where
        I: IntoIterator<Item = CoreResult<Fragment>>,
    {
        let mut manifest = partial;
        match self.run(&mut manifest, fragments.into_iter()).await {
            Ok(()) => {
                info!(fragments = manifest.len(), "upload complete");
                Ok(manifest)
            }
            Err(error) => Err(PartialUpload { manifest, error }),
        }
    }

    async fn run<I>(&self, manifest: &mut TransferManifest, mut fragments: I) -> Result<()>
    where
        I: Iterator<Item = CoreResult<Fragment>>,
    {
        self.config.validate()?;
        let deadline = Deadline::start(self.config.overall_timeout, self.config.attempt_timeout);

        if !manifest.is_empty() {
            info!(uploaded = manifest.len(), "resuming upload");
        }

        let mut batch_number = 0usize;
        loop {
            let batch = self.next_batch(&mut fragments, manifest)?;
            let Some(first_index) = batch.first().map(Fragment::index) else {
                break;
            };

            if batch_number > 0 {
                self.cooldown(&deadline, first_index).await?;
            }

            info!(
                batch = batch_number,
                first = first_index,
                fragments = batch.len(),
                "uploading batch"
            );
            if self.config.parallel_within_batch {
                self.upload_batch_parallel(batch, manifest, deadline).await?;
            } else {
                self.upload_batch_sequential(batch, manifest, deadline)
                    .await?;
            }
            batch_number += 1;
        }

        Ok(())
    }

    /// Pull up to `batch_size` fragments not yet in `manifest`.
    fn next_batch<I>(&self, fragments: &mut I, manifest: &TransferManifest) -> Result<Vec<Fragment>>
    where
        I: Iterator<Item = CoreResult<Fragment>>,
    {
        let mut batch = Vec::with_capacity(self.config.batch_size);

        while batch.len() < self.config.batch_size {
            let Some(fragment) = fragments.next() else {
                break;
            };
            let fragment = fragment?;

            match manifest.get(fragment.index()) {
                Some(receipt) => {
                    self.check_uploaded(receipt, &fragment)?;
                    debug!(fragment = fragment.index(), "already uploaded, skipping");
                }
                None => batch.push(fragment),
            }
        }

        Ok(batch)
    }

    /// A fragment being resumed over must match what its receipt recorded.
    fn check_uploaded(&self, receipt: &TransferReceipt, fragment: &Fragment) -> Result<()> {
        let index = fragment.index();
        if receipt.length != fragment.len() as u64 {
            return Err(TransferError::ResumeMismatch {
                index,
                expected: receipt.length,
                found: fragment.len() as u64,
            });
        }

        let actual = self
            .oracle
            .fingerprint(fragment.bytes())
            .map_err(|source| TransferError::Fingerprint { index, source })?;
        if actual != receipt.fingerprint {
            return Err(CoreError::IntegrityMismatch {
                index,
                expected: receipt.fingerprint,
                actual,
            }
            .into());
        }
        Ok(())
    }

    async fn cooldown(&self, deadline: &Deadline, next_index: usize) -> Result<()> {
        let pause = self.config.batch_cooldown;
        if pause.is_zero() {
            return Ok(());
        }
        if !deadline.allows_wait(pause) {
            return Err(TransferError::Timeout { index: next_index });
        }
        debug!(?pause, "cooling down between batches");
        tokio::time::sleep(pause).await;
        Ok(())
    }

    async fn upload_batch_sequential(
        &self,
        batch: Vec<Fragment>,
        manifest: &mut TransferManifest,
        deadline: Deadline,
    ) -> Result<()> {
        for fragment in batch {
            let receipt = upload_fragment(
                self.storage.clone(),
                self.oracle.clone(),
                self.config.retry_policy(),
                self.config.options.clone(),
                fragment,
                deadline,
            )
            .await?;
            manifest.push(receipt)?;
        }
        Ok(())
    }

    /// Upload a batch on a JoinSet, one task per fragment.
    ///
    /// Results go into index-addressed slots. Every task is allowed to
    /// finish; the manifest then takes the longest successful prefix and
    /// the first failure in index order is returned.
    async fn upload_batch_parallel(
        &self,
        batch: Vec<Fragment>,
        manifest: &mut TransferManifest,
        deadline: Deadline,
    ) -> Result<()> {
        let mut slots: Vec<Option<Result<TransferReceipt>>> = batch.iter().map(|_| None).collect();
        let mut workers = JoinSet::new();

        for (slot, fragment) in batch.into_iter().enumerate() {
            let job = upload_fragment(
                self.storage.clone(),
                self.oracle.clone(),
                self.config.retry_policy(),
                self.config.options.clone(),
                fragment,
                deadline,
            );
            workers.spawn(async move { (slot, job.await) });
        }

        let mut lost_worker = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => lost_worker = Some(TransferError::Worker(e.to_string())),
            }
        }

        let mut failure: Option<TransferError> = None;
        for slot in slots {
            match (slot, failure.is_some()) {
                (Some(Ok(receipt)), false) => manifest.push(receipt)?,
                (Some(Ok(receipt)), true) => warn!(
                    fragment = receipt.fragment_index,
                    transaction = %receipt.transaction_id.short(),
                    "uploaded after an earlier failure in its batch; not recorded"
                ),
                (Some(Err(e)), false) => failure = Some(e),
                (None, false) => {
                    failure = Some(lost_worker.take().unwrap_or_else(|| {
                        TransferError::Worker("upload task produced no result".into())
                    }))
                }
                (_, true) => {}
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fingerprint one fragment, then upload it under the retry policy.
async fn upload_fragment<S, O>(
    storage: Arc<S>,
    oracle: Arc<O>,
    policy: RetryPolicy,
    options: UploadOptions,
    fragment: Fragment,
    deadline: Deadline,
) -> Result<TransferReceipt>
where
    S: StorageClient + ?Sized,
    O: FingerprintOracle + ?Sized,
{
    let index = fragment.index();
    let fingerprint = oracle
        .fingerprint(fragment.bytes())
        .map_err(|source| TransferError::Fingerprint { index, source })?;

    let client = &*storage;
    let bytes = fragment.bytes();
    let options = &options;
    let handle = run_with_retry(policy, &deadline, index, move |attempt, attempt_deadline| {
        debug!(fragment = index, attempt, bytes = bytes.len(), "uploading fragment");
        client.upload(bytes, options, attempt_deadline)
    })
    .await?;

    info!(
        fragment = index,
        fingerprint = %fingerprint.short(),
        transaction = %handle.transaction_id.short(),
        "fragment uploaded"
    );

    Ok(TransferReceipt {
        fragment_index: index,
        fingerprint,
        transaction_id: handle.transaction_id,
        length: bytes.len() as u64,
        confirmed: handle.confirmed,
    })
}
