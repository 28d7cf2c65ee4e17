//! SQLite implementation of the StorageClient trait.
//!
//! A persistent, single-node stand-in for the storage network. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use shardline_core::{Fingerprint, FingerprintOracle, MerkleOracle, TransactionId};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{
    derive_transaction_id, FinalityMode, StorageClient, TransactionHandle, TransactionRecord,
    UploadOptions,
};

/// SQLite-based storage backend.
///
/// Thread-safe via internal Mutex. All database work runs on the blocking
/// pool so the async runtime is never stalled.
pub struct SqliteStorage<O = MerkleOracle> {
    conn: Arc<Mutex<Connection>>,
    oracle: Arc<O>,
}

impl SqliteStorage<MerkleOracle> {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_oracle(path, MerkleOracle::new())
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn, MerkleOracle::new()))
    }
}

impl<O> SqliteStorage<O>
where
    O: FingerprintOracle + 'static,
{
    /// Open a database that addresses content with `oracle`.
    pub fn open_with_oracle(path: impl AsRef<Path>, oracle: O) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        debug!(path = %path.display(), "opened sqlite storage");
        Ok(Self::from_connection(conn, oracle))
    }

    fn from_connection(conn: Connection, oracle: O) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            oracle: Arc::new(oracle),
        }
    }

    /// Number of distinct fragments stored.
    pub async fn fragment_count(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Number of recorded submissions.
    pub async fn transaction_count(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Look up a submission by transaction id.
    pub async fn transaction(&self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        let id = *id;
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT fingerprint, length, options FROM transactions
                     WHERE transaction_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(fingerprint, length, options)| {
                Ok(TransactionRecord {
                    transaction_id: id,
                    fingerprint: fingerprint_from_blob(fingerprint)?,
                    length: length as u64,
                    options: decode_options(&options)?,
                })
            })
            .transpose()
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn fingerprint_from_blob(blob: Vec<u8>) -> Result<Fingerprint> {
    let bytes: [u8; 32] = blob
        .try_into()
        .map_err(|b: Vec<u8>| StoreError::InvalidData(format!("fingerprint of {} bytes", b.len())))?;
    Ok(Fingerprint::from_bytes(bytes))
}

fn encode_options(options: &UploadOptions) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(options, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_options(bytes: &[u8]) -> Result<UploadOptions> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl<O> StorageClient for SqliteStorage<O>
where
    O: FingerprintOracle + 'static,
{
    async fn upload(
        &self,
        data: &[u8],
        options: &UploadOptions,
        _deadline: Instant,
    ) -> Result<TransactionHandle> {
        let data = data.to_vec();
        let options = options.clone();
        let oracle = self.oracle.clone();

        self.blocking(move |conn| {
            let fingerprint = oracle.fingerprint(&data)?;
            let options_cbor = encode_options(&options)?;
            let now = now_millis();

            let tx = conn.transaction()?;

            tx.execute(
                "INSERT OR IGNORE INTO fragments (fingerprint, data, length, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    fingerprint.as_bytes().as_slice(),
                    data.as_slice(),
                    data.len() as i64,
                    now
                ],
            )?;

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM transactions",
                [],
                |row| row.get(0),
            )?;
            let transaction_id = derive_transaction_id(&fingerprint, seq as u64);

            tx.execute(
                "INSERT INTO transactions (
                    transaction_id, seq, fingerprint, length, options, submitted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    transaction_id.as_bytes().as_slice(),
                    seq,
                    fingerprint.as_bytes().as_slice(),
                    data.len() as i64,
                    options_cbor,
                    now
                ],
            )?;

            tx.commit()?;
            debug!(fingerprint = ?fingerprint, seq, bytes = data.len(), "stored fragment");

            Ok(TransactionHandle {
                transaction_id,
                confirmed: options.finality == FinalityMode::FileFinalized,
            })
        })
        .await
    }

    async fn download(
        &self,
        fingerprint: &Fingerprint,
        verify_proof: bool,
        _deadline: Instant,
    ) -> Result<Bytes> {
        let fingerprint = *fingerprint;
        let oracle = self.oracle.clone();

        self.blocking(move |conn| {
            let data: Vec<u8> = conn
                .query_row(
                    "SELECT data FROM fragments WHERE fingerprint = ?1",
                    params![fingerprint.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound(fingerprint))?;

            if verify_proof && oracle.fingerprint(&data)? != fingerprint {
                return Err(StoreError::ProofInvalid(fingerprint));
            }

            Ok(Bytes::from(data))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_sqlite_upload_download() {
        let storage = SqliteStorage::open_memory().unwrap();
        let data = vec![0xAB; 5000];

        let handle = storage
            .upload(&data, &UploadOptions::default(), deadline())
            .await
            .unwrap();

        let record = storage.transaction(&handle.transaction_id).await.unwrap().unwrap();
        assert_eq!(record.length, 5000);
        assert_eq!(record.options, UploadOptions::default());

        let bytes = storage
            .download(&record.fingerprint, true, deadline())
            .await
            .unwrap();
        assert_eq!(&bytes[..], &data[..]);
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_content() {
        let storage = SqliteStorage::open_memory().unwrap();
        let opts = UploadOptions::default();

        let a = storage.upload(b"dup", &opts, deadline()).await.unwrap();
        let b = storage.upload(b"dup", &opts, deadline()).await.unwrap();

        assert_ne!(a.transaction_id, b.transaction_id);
        assert_eq!(storage.fragment_count().await.unwrap(), 1);
        assert_eq!(storage.transaction_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_not_found() {
        let storage = SqliteStorage::open_memory().unwrap();
        let fp = Fingerprint::from_bytes([3; 32]);
        assert!(matches!(
            storage.download(&fp, true, deadline()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(storage
            .transaction(&TransactionId::from_bytes([3; 32]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sqlite_proof_check() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage
            .upload(b"genuine", &UploadOptions::default(), deadline())
            .await
            .unwrap();
        let fp = MerkleOracle::new().fingerprint(b"genuine").unwrap();

        storage
            .blocking(move |conn| {
                conn.execute(
                    "UPDATE fragments SET data = ?1 WHERE fingerprint = ?2",
                    params![b"forged".as_slice(), fp.as_bytes().as_slice()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            storage.download(&fp, true, deadline()).await,
            Err(StoreError::ProofInvalid(_))
        ));
        let raw = storage.download(&fp, false, deadline()).await.unwrap();
        assert_eq!(&raw[..], b"forged");
    }

    #[tokio::test]
    async fn test_sqlite_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragments.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage
                .upload(b"persisted", &UploadOptions::default(), deadline())
                .await
                .unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        let fp = MerkleOracle::new().fingerprint(b"persisted").unwrap();
        let bytes = storage.download(&fp, true, deadline()).await.unwrap();
        assert_eq!(&bytes[..], b"persisted");
        assert_eq!(storage.transaction_count().await.unwrap(), 1);
    }
}
