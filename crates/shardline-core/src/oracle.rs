//! Fingerprint oracle: deterministic content digests for fragments.
//!
//! The pipeline never trusts a fingerprint it did not compute itself. Every
//! comparison goes through a [`FingerprintOracle`].

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::source::read_full;
use crate::types::Fingerprint;

/// Default Merkle leaf size in bytes.
pub const DEFAULT_LEAF_SIZE: usize = 1024;

const LEAF_DOMAIN: u8 = 0x00;
const NODE_DOMAIN: u8 = 0x01;

/// Computes deterministic content fingerprints.
pub trait FingerprintOracle: Send + Sync {
    /// Fingerprint an in-memory byte range.
    fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint>;

    /// Fingerprint a file on disk.
    fn fingerprint_path(&self, path: &Path) -> Result<Fingerprint> {
        let data = std::fs::read(path)?;
        self.fingerprint(&data)
    }
}

impl<T: FingerprintOracle + ?Sized> FingerprintOracle for Arc<T> {
    fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint> {
        (**self).fingerprint(data)
    }

    fn fingerprint_path(&self, path: &Path) -> Result<Fingerprint> {
        (**self).fingerprint_path(path)
    }
}

/// Blake3 binary Merkle tree over fixed-size leaves.
///
/// Leaves hash as `0x00 || leaf`, parents as `0x01 || left || right`. An odd
/// node at the end of a level is promoted unchanged. Empty input is a single
/// empty leaf.
#[derive(Debug, Clone, Copy)]
pub struct MerkleOracle {
    leaf_size: usize,
}

impl MerkleOracle {
    pub fn new() -> Self {
        Self {
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }

    pub fn with_leaf_size(leaf_size: usize) -> Result<Self> {
        if leaf_size == 0 {
            return Err(CoreError::InvalidParameter(
                "leaf_size must be greater than zero".into(),
            ));
        }
        Ok(Self { leaf_size })
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    fn leaf_hash(leaf: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[LEAF_DOMAIN]);
        hasher.update(leaf);
        *hasher.finalize().as_bytes()
    }

    fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[NODE_DOMAIN]);
        hasher.update(left);
        hasher.update(right);
        *hasher.finalize().as_bytes()
    }

    /// Fold leaf hashes into a root.
    pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
        if leaves.is_empty() {
            return Self::leaf_hash(&[]);
        }

        let mut level = leaves.to_vec();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::node_hash(left, right),
                    _ => pair[0],
                })
                .collect();
        }
        level[0]
    }

    fn fingerprint_reader<R: Read>(&self, reader: &mut R) -> Result<Fingerprint> {
        let mut leaves = Vec::new();
        let mut buf = vec![0u8; self.leaf_size];
        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            leaves.push(Self::leaf_hash(&buf[..n]));
            if n < self.leaf_size {
                break;
            }
        }
        Ok(Fingerprint(Self::merkle_root(&leaves)))
    }
}

impl Default for MerkleOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintOracle for MerkleOracle {
    fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint> {
        let leaves: Vec<[u8; 32]> = data.chunks(self.leaf_size).map(Self::leaf_hash).collect();
        Ok(Fingerprint(Self::merkle_root(&leaves)))
    }

    fn fingerprint_path(&self, path: &Path) -> Result<Fingerprint> {
        let mut file = File::open(path)?;
        self.fingerprint_reader(&mut file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let oracle = MerkleOracle::new();
        let data = vec![0xAB; 5000];
        assert_eq!(
            oracle.fingerprint(&data).unwrap(),
            oracle.fingerprint(&data).unwrap()
        );
    }

    #[test]
    fn test_single_byte_change_detected() {
        let oracle = MerkleOracle::with_leaf_size(64).unwrap();
        let data = vec![0u8; 1000];
        let mut flipped = data.clone();
        flipped[999] ^= 1;
        assert_ne!(
            oracle.fingerprint(&data).unwrap(),
            oracle.fingerprint(&flipped).unwrap()
        );
    }

    #[test]
    fn test_trailing_bytes_matter() {
        let oracle = MerkleOracle::with_leaf_size(4).unwrap();
        let a = oracle.fingerprint(&[1, 2, 3, 4]).unwrap();
        let b = oracle.fingerprint(&[1, 2, 3, 4, 0]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_input_is_empty_leaf() {
        let oracle = MerkleOracle::new();
        let fp = oracle.fingerprint(&[]).unwrap();
        assert_eq!(fp.0, MerkleOracle::leaf_hash(&[]));
    }

    #[test]
    fn test_odd_leaf_promoted() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let left = MerkleOracle::node_hash(&leaves[0], &leaves[1]);
        let expected = MerkleOracle::node_hash(&left, &leaves[2]);
        assert_eq!(MerkleOracle::merkle_root(&leaves), expected);
    }

    #[test]
    fn test_path_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let oracle = MerkleOracle::with_leaf_size(256).unwrap();
        assert_eq!(
            oracle.fingerprint_path(&path).unwrap(),
            oracle.fingerprint(&data).unwrap()
        );
    }

    #[test]
    fn test_zero_leaf_size_rejected() {
        assert!(MerkleOracle::with_leaf_size(0).is_err());
    }
}
