//! SQLite schema versioning.
//!
//! Each entry in [`STEPS`] moves the schema up one version. Applied steps are
//! recorded in `schema_migrations`, so opening an up-to-date database is a
//! single query.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

/// Ordered schema steps; step `i` produces version `i + 1`.
const STEPS: &[&str] = &[
    // v1: content-addressed fragments and the submission log
    r#"
    CREATE TABLE fragments (
        fingerprint BLOB PRIMARY KEY,     -- 32 bytes, Merkle root of data
        data BLOB NOT NULL,
        length INTEGER NOT NULL,
        stored_at INTEGER NOT NULL        -- Unix ms
    );

    -- One row per accepted upload, duplicates included
    CREATE TABLE transactions (
        transaction_id BLOB PRIMARY KEY,  -- 32 bytes
        seq INTEGER NOT NULL UNIQUE,      -- submission order
        fingerprint BLOB NOT NULL,
        length INTEGER NOT NULL,
        options BLOB NOT NULL,            -- CBOR UploadOptions
        submitted_at INTEGER NOT NULL
    );

    CREATE INDEX idx_transactions_fingerprint ON transactions(fingerprint);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            found, CURRENT_VERSION
        )));
    }

    let pending = &STEPS[found as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (offset, sql) in pending.iter().enumerate() {
        let version = found + offset as u32 + 1;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
        tracing::debug!(version, "applied schema step");
    }
    tx.commit()?;

    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_gets_all_tables() {
        let conn = fresh();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table'
                 AND name IN ('fragments', 'transactions', 'schema_migrations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_reopen_applies_nothing() {
        let mut conn = fresh();
        migrate(&mut conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_VERSION as i64);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = fresh();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
