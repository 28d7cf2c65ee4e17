//! Transfer receipts and the manifest that orders them.
//!
//! The manifest is the only artifact that survives from upload to download.
//! Receipt `i` always describes fragment `i`; [`TransferManifest::push`]
//! refuses anything else, and loading a manifest re-checks the alignment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fragment::FragmentSpec;
use crate::types::{Fingerprint, TransactionId};

/// Record of one successfully uploaded fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    #[serde(rename = "index")]
    pub fragment_index: usize,
    /// Fingerprint computed locally before transfer.
    pub fingerprint: Fingerprint,
    pub transaction_id: TransactionId,
    /// Fragment length in bytes.
    pub length: u64,
    /// Whether the network confirmed the submission at the requested finality.
    #[serde(default)]
    pub confirmed: bool,
}

/// On-disk encodings for a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Cbor,
}

impl ManifestFormat {
    /// Pick a format from the file extension (`.cbor` → CBOR, else JSON).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("cbor") => Self::Cbor,
            _ => Self::Json,
        }
    }
}

/// Ordered, index-aligned sequence of transfer receipts.
///
/// Append-only while uploading; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TransferReceipt>", into = "Vec<TransferReceipt>")]
pub struct TransferManifest {
    receipts: Vec<TransferReceipt>,
}

impl TransferManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    /// Index the next appended receipt must carry.
    pub fn next_index(&self) -> usize {
        self.receipts.len()
    }

    pub fn receipts(&self) -> &[TransferReceipt] {
        &self.receipts
    }

    pub fn get(&self, index: usize) -> Option<&TransferReceipt> {
        self.receipts.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferReceipt> {
        self.receipts.iter()
    }

    /// Append a receipt. Its index must equal [`next_index`](Self::next_index).
    pub fn push(&mut self, receipt: TransferReceipt) -> Result<()> {
        let position = self.receipts.len();
        if receipt.fragment_index != position {
            return Err(CoreError::ManifestMisaligned {
                position,
                index: receipt.fragment_index,
            });
        }
        self.receipts.push(receipt);
        Ok(())
    }

    /// Sum of all recorded fragment lengths.
    pub fn total_length(&self) -> u64 {
        self.receipts.iter().map(|r| r.length).sum()
    }

    /// Reconstruct the fragment layout from recorded lengths.
    pub fn fragment_specs(&self) -> Vec<FragmentSpec> {
        let mut offset = 0u64;
        self.receipts
            .iter()
            .map(|r| {
                let spec = FragmentSpec {
                    index: r.fragment_index,
                    offset,
                    length: r.length as usize,
                };
                offset += r.length;
                spec
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let receipts: Vec<TransferReceipt> =
            serde_json::from_str(s).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        Self::try_from(receipts)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let receipts: Vec<TransferReceipt> =
            ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        Self::try_from(receipts)
    }

    /// Write the manifest to `path`, choosing the encoding by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = match ManifestFormat::from_path(path) {
            ManifestFormat::Json => self.to_json()?.into_bytes(),
            ManifestFormat::Cbor => self.to_cbor()?,
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read a manifest from `path`, choosing the encoding by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        match ManifestFormat::from_path(path) {
            ManifestFormat::Json => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| CoreError::DecodingError(e.to_string()))?;
                Self::from_json(&text)
            }
            ManifestFormat::Cbor => Self::from_cbor(&bytes),
        }
    }
}

impl TryFrom<Vec<TransferReceipt>> for TransferManifest {
    type Error = CoreError;

    fn try_from(receipts: Vec<TransferReceipt>) -> Result<Self> {
        let mut manifest = Self {
            receipts: Vec::with_capacity(receipts.len()),
        };
        for receipt in receipts {
            manifest.push(receipt)?;
        }
        Ok(manifest)
    }
}

impl From<TransferManifest> for Vec<TransferReceipt> {
    fn from(manifest: TransferManifest) -> Self {
        manifest.receipts
    }
}

impl<'a> IntoIterator for &'a TransferManifest {
    type Item = &'a TransferReceipt;
    type IntoIter = std::slice::Iter<'a, TransferReceipt>;

    fn into_iter(self) -> Self::IntoIter {
        self.receipts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(index: usize, length: u64) -> TransferReceipt {
        TransferReceipt {
            fragment_index: index,
            fingerprint: Fingerprint::from_bytes([index as u8; 32]),
            transaction_id: TransactionId::from_bytes([0xF0 | index as u8; 32]),
            length,
            confirmed: true,
        }
    }

    fn manifest(lengths: &[u64]) -> TransferManifest {
        let mut m = TransferManifest::new();
        for (i, len) in lengths.iter().enumerate() {
            m.push(receipt(i, *len)).unwrap();
        }
        m
    }

    #[test]
    fn test_push_rejects_misaligned_receipt() {
        let mut m = manifest(&[10]);
        let err = m.push(receipt(2, 10)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ManifestMisaligned {
                position: 1,
                index: 2
            }
        ));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_fragment_specs_offsets() {
        let m = manifest(&[300, 300, 100]);
        let specs = m.fragment_specs();
        assert_eq!(specs[2].offset, 600);
        assert_eq!(specs[2].length, 100);
        assert_eq!(m.total_length(), 700);
    }

    #[test]
    fn test_json_is_array_of_records() {
        let m = manifest(&[5, 3]);
        let json = m.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["index"], 1);
        assert!(records[0]["fingerprint"].as_str().unwrap().starts_with("0x"));
        assert!(records[0]["transaction_id"].is_string());

        assert_eq!(TransferManifest::from_json(&json).unwrap(), m);
    }

    #[test]
    fn test_json_misaligned_rejected() {
        let mut records = vec![receipt(0, 1), receipt(1, 1)];
        records.swap(0, 1);
        let json = serde_json::to_string(&records).unwrap();
        assert!(matches!(
            TransferManifest::from_json(&json),
            Err(CoreError::ManifestMisaligned {
                position: 0,
                index: 1
            })
        ));
    }

    #[test]
    fn test_load_misaligned_file_keeps_variant() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![receipt(1, 10)];

        let json_path = dir.path().join("manifest.json");
        std::fs::write(&json_path, serde_json::to_string(&records).unwrap()).unwrap();
        assert!(matches!(
            TransferManifest::load(&json_path),
            Err(CoreError::ManifestMisaligned { position: 0, index: 1 })
        ));

        let cbor_path = dir.path().join("manifest.cbor");
        let mut cbor = Vec::new();
        ciborium::into_writer(&records, &mut cbor).unwrap();
        std::fs::write(&cbor_path, cbor).unwrap();
        assert!(matches!(
            TransferManifest::load(&cbor_path),
            Err(CoreError::ManifestMisaligned { position: 0, index: 1 })
        ));
    }

    #[test]
    fn test_load_garbage_is_decoding_error() {
        assert!(matches!(
            TransferManifest::from_json("{not json"),
            Err(CoreError::DecodingError(_))
        ));
    }

    #[test]
    fn test_save_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest(&[8, 8, 2]);

        let json_path = dir.path().join("manifest.json");
        m.save(&json_path).unwrap();
        assert_eq!(TransferManifest::load(&json_path).unwrap(), m);

        let cbor_path = dir.path().join("manifest.cbor");
        m.save(&cbor_path).unwrap();
        assert_eq!(TransferManifest::load(&cbor_path).unwrap(), m);
        assert_eq!(ManifestFormat::from_path(&cbor_path), ManifestFormat::Cbor);
    }
}
