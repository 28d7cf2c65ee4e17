//! Integrity verification of retrieved fragments.
//!
//! Both sides are fingerprinted from their bytes on every call. Digests
//! carried in the manifest or reported by the network are never consulted.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fragment::Fragment;
use crate::oracle::FingerprintOracle;
use crate::types::Fingerprint;

/// Outcome of comparing one original fragment with its retrieved copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub fragment_index: usize,
    #[serde(rename = "match")]
    pub matched: bool,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

/// Recomputes and compares fingerprints of original vs retrieved fragments.
pub struct IntegrityVerifier<O> {
    oracle: O,
}

impl<O: FingerprintOracle> IntegrityVerifier<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Verify two index-aligned sequences.
    ///
    /// Fails fast with `ShapeMismatch` when the lengths differ. Mismatched
    /// content is reported in the results, not as an error.
    pub fn verify(
        &self,
        original: &[Fragment],
        retrieved: &[Fragment],
    ) -> Result<Vec<VerificationResult>> {
        if original.len() != retrieved.len() {
            return Err(CoreError::ShapeMismatch {
                original: original.len(),
                retrieved: retrieved.len(),
            });
        }

        original
            .iter()
            .zip(retrieved)
            .map(|(o, r)| self.verify_pair(o, r))
            .collect()
    }

    /// Verify a single pair. Both fragments must carry the same index.
    pub fn verify_pair(&self, original: &Fragment, retrieved: &Fragment) -> Result<VerificationResult> {
        if original.index() != retrieved.index() {
            return Err(CoreError::GapDetected {
                expected: original.index(),
                found: Some(retrieved.index()),
            });
        }

        let expected = self.oracle.fingerprint(original.bytes())?;
        let actual = self.oracle.fingerprint(retrieved.bytes())?;

        Ok(VerificationResult {
            fragment_index: original.index(),
            matched: expected == actual,
            expected,
            actual,
        })
    }
}

/// Turn the first failed result into an `IntegrityMismatch` error.
pub fn ensure_intact(results: &[VerificationResult]) -> Result<()> {
    match results.iter().find(|r| !r.matched) {
        Some(r) => Err(CoreError::IntegrityMismatch {
            index: r.fragment_index,
            expected: r.expected,
            actual: r.actual,
        }),
        None => Ok(()),
    }
}
