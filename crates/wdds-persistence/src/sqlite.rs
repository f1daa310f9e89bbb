// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! SQLite persistence backend
//!
//! Production-ready persistent storage with zero external services.
//! Thread-safe via an internal Mutex (the SQLite `Connection` is not Sync).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE samples (
//!     writer_guid BLOB NOT NULL,
//!     sequence    INTEGER NOT NULL,
//!     kind        INTEGER NOT NULL,
//!     timestamp_ns INTEGER NOT NULL,
//!     instance    INTEGER NOT NULL,
//!     key_bytes   BLOB NOT NULL,
//!     payload     BLOB NOT NULL,
//!     PRIMARY KEY (writer_guid, sequence)
//! );
//! ```

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use wdds::core::types::{ChangeKind, InstanceHandle, Timestamp};
use wdds::{Error, Guid, PersistedSample, PersistenceStore, Result};

/// SQLite implementation of [`wdds::PersistenceStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS samples (
                writer_guid BLOB NOT NULL,
                sequence    INTEGER NOT NULL,
                kind        INTEGER NOT NULL,
                timestamp_ns INTEGER NOT NULL,
                instance    INTEGER NOT NULL,
                key_bytes   BLOB NOT NULL,
                payload     BLOB NOT NULL,
                PRIMARY KEY (writer_guid, sequence)
            )",
            [],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::debug!("[sqlite-store] lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Total stored samples across all writers.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock_conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as usize)
    }

    fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<PersistedSample> {
        let guid_blob: Vec<u8> = row.get(0)?;
        let mut guid_bytes = [0u8; 16];
        if guid_blob.len() == 16 {
            guid_bytes.copy_from_slice(&guid_blob);
        }
        let kind_tag: i64 = row.get(2)?;

        Ok(PersistedSample {
            writer_guid: Guid::from_bytes(guid_bytes),
            sequence_number: row.get::<_, i64>(1)? as u64,
            kind: ChangeKind::from_u8(kind_tag as u8).unwrap_or(ChangeKind::Alive),
            source_timestamp: Timestamp::from_nanos(row.get::<_, i64>(3)? as u64),
            instance_handle: InstanceHandle(row.get::<_, i64>(4)? as u64),
            key: row.get(5)?,
            payload: row.get(6)?,
        })
    }
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Generic(format!("sqlite: {}", e))
}

impl PersistenceStore for SqliteStore {
    fn put(&self, sample: &PersistedSample) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO samples
                (writer_guid, sequence, kind, timestamp_ns, instance, key_bytes, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &sample.writer_guid.to_bytes()[..],
                sample.sequence_number as i64,
                i64::from(sample.kind.as_u8()),
                sample.source_timestamp.as_nanos() as i64,
                sample.instance_handle.0 as i64,
                sample.key,
                sample.payload,
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn get_range(&self, writer_guid: Guid, from: u64, to: u64) -> Result<Vec<PersistedSample>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(
                "SELECT writer_guid, sequence, kind, timestamp_ns, instance, key_bytes, payload
                 FROM samples
                 WHERE writer_guid = ?1 AND sequence >= ?2 AND sequence <= ?3
                 ORDER BY sequence ASC",
            )
            .map_err(sql_err)?;

        let to_clamped = to.min(i64::MAX as u64);
        let rows = stmt
            .query_map(
                params![
                    &writer_guid.to_bytes()[..],
                    from.min(i64::MAX as u64) as i64,
                    to_clamped as i64
                ],
                Self::row_to_sample,
            )
            .map_err(sql_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql_err)?);
        }
        Ok(out)
    }

    fn delete(&self, writer_guid: Guid, sequence_number: u64) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM samples WHERE writer_guid = ?1 AND sequence = ?2",
            params![&writer_guid.to_bytes()[..], sequence_number as i64],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}
