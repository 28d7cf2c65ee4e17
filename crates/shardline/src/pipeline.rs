//! The pipeline driver: one state machine from source file to verified copy.
//!
//! Stages run strictly in order and the first failure halts the run:
//!
//! ```text
//! Idle -> Fragmented -> Uploaded -> Downloaded -> Verified -> Combined -> Done
//!   \__________\____________\____________\___________\_________> Failed(stage)
//! ```

use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use shardline_core::{
    ensure_intact, fragment_capacity, generate_test_file, plan_fragments, BufferPool, CoreError,
    FingerprintOracle, Fragmenter, IntegrityVerifier, MerkleOracle, Reassembler, SourceStream,
    TransferManifest, VerificationResult,
};
use shardline_store::StorageClient;
use shardline_transfer::{DownloadCoordinator, TransferError, UploadCoordinator};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, Stage, StageFailure};
use crate::spool::FragmentSpool;

type SourceFragmenter = Fragmenter<SourceStream<File>>;

/// Where a [`PipelineDriver`] is in its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fragmented,
    Uploaded,
    Downloaded,
    Verified,
    Combined,
    Done,
    Failed { stage: Stage, cause: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Fragmented => f.write_str("fragmented"),
            PipelineState::Uploaded => f.write_str("uploaded"),
            PipelineState::Downloaded => f.write_str("downloaded"),
            PipelineState::Verified => f.write_str("verified"),
            PipelineState::Combined => f.write_str("combined"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { stage, .. } => write!(f, "failed({})", stage),
        }
    }
}

/// Outcome of a run that reached `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub manifest: TransferManifest,
    pub verification: Vec<VerificationResult>,
    pub bytes_written: u64,
    pub output: PathBuf,
}

/// Attach a stage to any error the pipeline knows how to carry.
trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for std::result::Result<T, E> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|e| StageFailure::new(stage, e))
    }
}

/// Runs the transfer pipeline against one storage backend.
///
/// A driver is single-use: once it has left `Idle`, further runs are
/// rejected. The full state history is kept for inspection.
pub struct PipelineDriver<S, O = MerkleOracle> {
    storage: Arc<S>,
    oracle: Arc<O>,
    config: PipelineConfig,
    state: PipelineState,
    history: Vec<PipelineState>,
    verification: Vec<VerificationResult>,
}

impl<S> PipelineDriver<S, MerkleOracle>
where
    S: StorageClient + 'static,
{
    /// A driver using the default Merkle fingerprint.
    pub fn with_storage(storage: Arc<S>, config: PipelineConfig) -> Self {
        Self::new(storage, Arc::new(MerkleOracle::new()), config)
    }
}

impl<S, O> PipelineDriver<S, O>
where
    S: StorageClient + 'static,
    O: FingerprintOracle + 'static,
{
    pub fn new(storage: Arc<S>, oracle: Arc<O>, config: PipelineConfig) -> Self {
        Self {
            storage,
            oracle,
            config,
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
            verification: Vec::new(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Per-fragment results of the last verification, in index order.
    pub fn verification(&self) -> &[VerificationResult] {
        &self.verification
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Run every stage: fragment `input`, upload, download, verify against
    /// `input`, and write the reassembled copy to `output`.
    pub async fn run(&mut self, input: &Path, output: &Path) -> Result<PipelineReport> {
        self.ensure_idle(Stage::Fragment)?;
        let result = self.run_stages(input, output).await;
        self.finish(result)
    }

    /// Fragment and upload only. The manifest is what a later
    /// [`download_only`](Self::download_only) needs.
    ///
    /// With `resume`, fragments already recorded in that manifest are
    /// checked against the source and skipped.
    pub async fn upload_only(
        &mut self,
        input: &Path,
        resume: Option<TransferManifest>,
    ) -> Result<TransferManifest> {
        self.ensure_idle(Stage::Fragment)?;
        let result = self.upload_stages(input, resume).await;
        self.finish(result)
    }

    /// Download, verify and reassemble from a saved manifest.
    ///
    /// With `source`, fragments are compared against the original file.
    /// Without it, each retrieved fragment is checked against the
    /// fingerprint recorded in the manifest.
    pub async fn download_only(
        &mut self,
        manifest: &TransferManifest,
        source: Option<&Path>,
        output: &Path,
    ) -> Result<PipelineReport> {
        self.ensure_idle(Stage::Download)?;
        let result = self.download_stages(manifest, source, output).await;
        self.finish(result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stage sequences
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_stages(&mut self, input: &Path, output: &Path) -> Result<PipelineReport> {
        self.config.validate().at(Stage::Fragment)?;
        self.generate(input)?;
        let (mut fragmenter, planned) = self.fragment(input)?;
        let manifest = self.upload(&mut fragmenter, None).await?;
        let spool = self.download(&manifest).await?;
        self.verify(Some((fragmenter, planned)), &spool, &manifest)?;
        let bytes_written = self.combine(&spool, &manifest, output)?;
        Ok(self.report(manifest, bytes_written, output))
    }

    async fn upload_stages(
        &mut self,
        input: &Path,
        resume: Option<TransferManifest>,
    ) -> Result<TransferManifest> {
        self.config.validate().at(Stage::Fragment)?;
        self.generate(input)?;
        let (mut fragmenter, _) = self.fragment(input)?;
        self.upload(&mut fragmenter, resume).await
    }

    async fn download_stages(
        &mut self,
        manifest: &TransferManifest,
        source: Option<&Path>,
        output: &Path,
    ) -> Result<PipelineReport> {
        self.config.validate().at(Stage::Download)?;
        let spool = self.download(manifest).await?;
        match source {
            Some(path) => {
                let (fragmenter, planned) = self.open_source(path, Stage::Verify)?;
                self.verify(Some((fragmenter, planned)), &spool, manifest)?;
            }
            None => self.verify(None, &spool, manifest)?,
        }
        let bytes_written = self.combine(&spool, manifest, output)?;
        Ok(self.report(manifest.clone(), bytes_written, output))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────────────────

    fn generate(&mut self, input: &Path) -> Result<()> {
        if let Some(size) = self.config.generate_test_file {
            info!(stage = %Stage::Generate, path = %input.display(), bytes = size, "generating test file");
            if let Some(parent) = input.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(CoreError::from).at(Stage::Generate)?;
            }
            generate_test_file(input, size).at(Stage::Generate)?;
        }
        Ok(())
    }

    fn fragment(&mut self, input: &Path) -> Result<(SourceFragmenter, usize)> {
        let (fragmenter, planned) = self.open_source(input, Stage::Fragment)?;
        info!(
            stage = %Stage::Fragment,
            path = %input.display(),
            fragments = planned,
            fragment_size = self.config.fragment_size,
            "source fragmented"
        );
        self.advance(PipelineState::Fragmented);
        Ok((fragmenter, planned))
    }

    /// Open `path` as a fragment stream and plan its fragments.
    ///
    /// A source longer than the fragment capacity is an error unless
    /// truncation is allowed.
    fn open_source(&self, path: &Path, stage: Stage) -> Result<(SourceFragmenter, usize)> {
        let source = SourceStream::open(path).at(stage)?;
        let source_len = source.len();
        let fragment_size = self.config.fragment_size;
        let max_parts = self.config.max_parts;

        let capacity = fragment_capacity(fragment_size, max_parts);
        if source_len > capacity {
            if !self.config.allow_truncation {
                return Err(CoreError::Truncation {
                    source_len,
                    capacity,
                })
                .at(stage);
            }
            warn!(source_len, capacity, "source exceeds fragment capacity, tail will not be transferred");
        }

        let planned = plan_fragments(source_len, fragment_size, max_parts)
            .at(stage)?
            .len();
        let fragmenter = Fragmenter::new(source, fragment_size, max_parts).at(stage)?;
        Ok((fragmenter, planned))
    }

    async fn upload(
        &mut self,
        fragmenter: &mut SourceFragmenter,
        resume: Option<TransferManifest>,
    ) -> Result<TransferManifest> {
        info!(
            stage = %Stage::Upload,
            resumed = resume.as_ref().map_or(0, TransferManifest::len),
            "uploading fragments"
        );
        let coordinator = UploadCoordinator::new(
            self.storage.clone(),
            self.oracle.clone(),
            self.config.upload.clone(),
        );
        let result = match resume {
            Some(partial) => coordinator.resume(partial, &mut *fragmenter).await,
            None => coordinator.upload(&mut *fragmenter).await,
        };

        match result {
            Ok(manifest) => {
                self.advance(PipelineState::Uploaded);
                Ok(manifest)
            }
            Err(partial) => Err(StageFailure {
                stage: Stage::Upload,
                error: partial.error.into(),
                partial_manifest: Some(partial.manifest),
            }),
        }
    }

    async fn download(&mut self, manifest: &TransferManifest) -> Result<FragmentSpool> {
        let spool = FragmentSpool::create(self.config.spool_dir()).at(Stage::Download)?;
        spool.clear(manifest.len()).at(Stage::Download)?;
        info!(
            stage = %Stage::Download,
            fragments = manifest.len(),
            spool = %spool.dir().display(),
            "downloading fragments"
        );

        let coordinator = DownloadCoordinator::new(self.storage.clone(), self.config.download.clone());
        coordinator
            .download_to(manifest, |fragment| {
                spool.write(&fragment).map_err(TransferError::from)
            })
            .await
            .at(Stage::Download)?;

        self.advance(PipelineState::Downloaded);
        Ok(spool)
    }

    fn verify(
        &mut self,
        original: Option<(SourceFragmenter, usize)>,
        spool: &FragmentSpool,
        manifest: &TransferManifest,
    ) -> Result<()> {
        let results = match original {
            Some((fragmenter, planned)) => {
                self.verify_against_source(fragmenter, planned, spool, manifest)
            }
            None => self.verify_against_manifest(spool, manifest),
        }
        .at(Stage::Verify)?;

        self.verification = results;
        ensure_intact(&self.verification).at(Stage::Verify)?;

        info!(stage = %Stage::Verify, fragments = self.verification.len(), "all fragments verified");
        self.advance(PipelineState::Verified);
        Ok(())
    }

    /// Re-read the source and compare each fragment with its spooled copy.
    fn verify_against_source(
        &self,
        fragmenter: SourceFragmenter,
        planned: usize,
        spool: &FragmentSpool,
        manifest: &TransferManifest,
    ) -> std::result::Result<Vec<VerificationResult>, CoreError> {
        if planned != manifest.len() {
            return Err(CoreError::ShapeMismatch {
                original: planned,
                retrieved: manifest.len(),
            });
        }

        let mut fragmenter = self.recycling(fragmenter);
        fragmenter.rewind()?;
        let specs = manifest.fragment_specs();
        let verifier = IntegrityVerifier::new(self.oracle.clone());
        let mut results = Vec::with_capacity(specs.len());
        let mut scratch = Vec::new();

        while let Some(original) = fragmenter.next() {
            let original = original?;
            let index = original.index();
            let spec = specs.get(index).ok_or(CoreError::ShapeMismatch {
                original: index + 1,
                retrieved: specs.len(),
            })?;

            let retrieved = spool.read(index, spec.offset, mem::take(&mut scratch))?;
            let result = verifier.verify_pair(&original, &retrieved)?;
            log_mismatch(&result);
            results.push(result);

            scratch = retrieved.into_bytes();
            fragmenter.recycle(original);
        }

        Ok(results)
    }

    /// Attach a buffer pool for the verify pass, which recycles each original.
    fn recycling(&self, fragmenter: SourceFragmenter) -> SourceFragmenter {
        fragmenter.with_pool(BufferPool::new(1, self.config.fragment_size))
    }

    /// Check each spooled fragment against its recorded fingerprint.
    fn verify_against_manifest(
        &self,
        spool: &FragmentSpool,
        manifest: &TransferManifest,
    ) -> std::result::Result<Vec<VerificationResult>, CoreError> {
        let mut results = Vec::with_capacity(manifest.len());
        let mut scratch = Vec::new();

        for (receipt, spec) in manifest.iter().zip(manifest.fragment_specs()) {
            let retrieved = spool.read(spec.index, spec.offset, mem::take(&mut scratch))?;
            let actual = self.oracle.fingerprint(retrieved.bytes())?;
            let result = VerificationResult {
                fragment_index: spec.index,
                matched: actual == receipt.fingerprint,
                expected: receipt.fingerprint,
                actual,
            };
            log_mismatch(&result);
            results.push(result);
            scratch = retrieved.into_bytes();
        }

        Ok(results)
    }

    fn combine(
        &mut self,
        spool: &FragmentSpool,
        manifest: &TransferManifest,
        output: &Path,
    ) -> Result<u64> {
        info!(stage = %Stage::Combine, output = %output.display(), "combining fragments");
        let written = write_combined(spool, manifest, output).at(Stage::Combine)?;
        info!(stage = %Stage::Combine, bytes = written, "output written");
        self.advance(PipelineState::Combined);
        Ok(written)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    fn ensure_idle(&self, stage: Stage) -> Result<()> {
        if self.state == PipelineState::Idle {
            Ok(())
        } else {
            Err(StageFailure::new(
                stage,
                PipelineError::AlreadyStarted(self.state.to_string()),
            ))
        }
    }

    fn advance(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "pipeline state changed");
        self.state = next.clone();
        self.history.push(next);
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.advance(PipelineState::Done);
                Ok(value)
            }
            Err(failure) => {
                error!(
                    stage = %failure.stage,
                    fragment = ?failure.fragment_index(),
                    error = %failure.error,
                    "pipeline failed"
                );
                self.advance(PipelineState::Failed {
                    stage: failure.stage,
                    cause: failure.error.to_string(),
                });
                Err(failure)
            }
        }
    }

    fn report(&self, manifest: TransferManifest, bytes_written: u64, output: &Path) -> PipelineReport {
        PipelineReport {
            manifest,
            verification: self.verification.clone(),
            bytes_written,
            output: output.to_path_buf(),
        }
    }
}

fn log_mismatch(result: &VerificationResult) {
    if !result.matched {
        warn!(
            fragment = result.fragment_index,
            expected = %result.expected.short(),
            actual = %result.actual.short(),
            "fingerprint mismatch"
        );
    }
}

/// Stream spooled fragments into `output` in manifest order.
fn write_combined(
    spool: &FragmentSpool,
    manifest: &TransferManifest,
    output: &Path,
) -> std::result::Result<u64, CoreError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut reassembler = Reassembler::new(BufWriter::new(File::create(output)?));
    let mut scratch = Vec::new();
    for spec in manifest.fragment_specs() {
        let fragment = spool.read(spec.index, spec.offset, scratch)?;
        scratch = reassembler.append(fragment)?;
    }

    let (_, written) = reassembler.finish(Some(manifest.len()))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_store::MemoryStorage;

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(
            PipelineState::Failed {
                stage: Stage::Upload,
                cause: "boom".into()
            }
            .to_string(),
            "failed(upload)"
        );
        assert!(PipelineState::Done.is_terminal());
        assert!(!PipelineState::Verified.is_terminal());
    }

    #[test]
    fn test_only_verify_pass_pools_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        fs::write(&input, vec![5u8; 100]).unwrap();
        let config = PipelineConfig {
            fragment_size: 40,
            max_parts: 3,
            work_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let driver = PipelineDriver::with_storage(Arc::new(MemoryStorage::new()), config);

        let (fragmenter, planned) = driver.open_source(&input, Stage::Fragment).unwrap();
        assert_eq!(planned, 3);
        assert_eq!(fragmenter.pool().slot_count(), 0);

        let fragmenter = driver.recycling(fragmenter);
        assert_eq!(fragmenter.pool().slot_count(), 1);
        assert_eq!(fragmenter.pool().idle(), 0);
    }

    #[tokio::test]
    async fn test_driver_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.bin");
        let config = PipelineConfig {
            work_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let mut driver = PipelineDriver::with_storage(Arc::new(MemoryStorage::new()), config);

        let first = driver.run(&input, &dir.path().join("out.bin")).await.unwrap_err();
        assert_eq!(first.stage, Stage::Fragment);
        assert!(matches!(driver.state(), PipelineState::Failed { .. }));

        let second = driver.run(&input, &dir.path().join("out.bin")).await.unwrap_err();
        assert!(matches!(second.error, PipelineError::AlreadyStarted(_)));
        assert_eq!(driver.history().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            max_parts: 0,
            generate_test_file: Some(100),
            work_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let input = dir.path().join("input.bin");
        let mut driver = PipelineDriver::with_storage(Arc::new(MemoryStorage::new()), config);

        let err = driver.upload_only(&input, None).await.unwrap_err();
        assert!(matches!(err.error, PipelineError::InvalidConfig(_)));
        assert!(!input.exists());
    }
}
