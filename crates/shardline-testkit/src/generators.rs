//! Proptest generators for property-based testing.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use shardline_core::{fragment_capacity, Fingerprint};

/// Generate arbitrary source content up to `max_len` bytes.
pub fn source_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a fragment size small enough to produce several fragments.
pub fn fragment_size() -> impl Strategy<Value = usize> {
    1usize..=4096
}

/// Generate a random Fingerprint.
pub fn fingerprint() -> impl Strategy<Value = Fingerprint> {
    any::<[u8; 32]>().prop_map(Fingerprint::from_bytes)
}

/// Reproducible pseudo-random content from a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

/// Parameters for one fragmentation run.
#[derive(Debug, Clone)]
pub struct SplitParams {
    pub source: Vec<u8>,
    pub fragment_size: usize,
    pub max_parts: usize,
}

impl SplitParams {
    /// Bytes the fragments will cover.
    pub fn covered(&self) -> usize {
        (self.source.len() as u64).min(fragment_capacity(self.fragment_size, self.max_parts))
            as usize
    }

    /// True when `max_parts` is too small for the whole source.
    pub fn truncates(&self) -> bool {
        self.covered() < self.source.len()
    }
}

impl Arbitrary for SplitParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (source_bytes(20_000), fragment_size(), 1usize..=64)
            .prop_map(|(source, fragment_size, max_parts)| SplitParams {
                source,
                fragment_size,
                max_parts,
            })
            .boxed()
    }
}
