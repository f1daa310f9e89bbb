// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Persistence boundary for PERSISTENT durability.
//!
//! The backend is a narrow key/value store keyed by
//! (writer_guid, sequence_number): `put`, `get_range`, `delete`. On writer
//! restart the backend is read in sequence order and loaded into the history
//! before the writer is enabled. Backend internals (SQLite, etc.) live in
//! separate crates implementing [`PersistenceStore`].

use crate::core::types::{ChangeKind, Guid, InstanceHandle, Timestamp};
use crate::error::Result;

/// One persisted sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSample {
    pub writer_guid: Guid,
    pub sequence_number: u64,
    pub kind: ChangeKind,
    pub source_timestamp: Timestamp,
    pub instance_handle: InstanceHandle,
    /// Serialized key fields; empty for unkeyed topics. Needed to rebuild
    /// the instance registry on restore.
    pub key: Vec<u8>,
    /// Serialized payload; empty for pure dispose/unregister samples.
    pub payload: Vec<u8>,
}

/// Narrow key/value store contract.
pub trait PersistenceStore: Send + Sync {
    /// Store one sample under (writer_guid, sequence_number).
    ///
    /// # Errors
    ///
    /// Backend faults surface as `Error::Generic`/`Error::Io`.
    fn put(&self, sample: &PersistedSample) -> Result<()>;

    /// Read `[from, to]` inclusive for one writer, ascending by sequence
    /// number.
    ///
    /// # Errors
    ///
    /// Backend faults surface as `Error::Generic`/`Error::Io`.
    fn get_range(&self, writer_guid: Guid, from: u64, to: u64) -> Result<Vec<PersistedSample>>;

    /// Remove one sample.
    ///
    /// # Errors
    ///
    /// Backend faults surface as `Error::Generic`/`Error::Io`.
    fn delete(&self, writer_guid: Guid, sequence_number: u64) -> Result<()>;
}

/// In-memory store used by tests and as a reference implementation.
pub struct MemoryStore {
    samples: parking_lot::Mutex<Vec<PersistedSample>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

impl PersistenceStore for MemoryStore {
    fn put(&self, sample: &PersistedSample) -> Result<()> {
        let mut samples = self.samples.lock();
        samples.retain(|s| {
            s.writer_guid != sample.writer_guid || s.sequence_number != sample.sequence_number
        });
        samples.push(sample.clone());
        Ok(())
    }

    fn get_range(&self, writer_guid: Guid, from: u64, to: u64) -> Result<Vec<PersistedSample>> {
        let mut out: Vec<PersistedSample> = self
            .samples
            .lock()
            .iter()
            .filter(|s| {
                s.writer_guid == writer_guid
                    && s.sequence_number >= from
                    && s.sequence_number <= to
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.sequence_number);
        Ok(out)
    }

    fn delete(&self, writer_guid: Guid, sequence_number: u64) -> Result<()> {
        self.samples
            .lock()
            .retain(|s| s.writer_guid != writer_guid || s.sequence_number != sequence_number);
        Ok(())
    }
}
