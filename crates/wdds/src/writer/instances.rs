// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Instance lifecycle and the per-writer instance registry.
//!
//! An instance is the (topic, key, registering-writer) triple. Handles are
//! minted from the serialized key fields and are local to this writer.

use std::collections::HashMap;

use crate::core::types::{instance_handle_from_key, InstanceHandle};
use crate::error::{Error, Result};
use crate::qos::{OwnershipStrength, LENGTH_UNLIMITED};

/// Lifecycle state of one registered instance.
///
/// ```text
/// new --register/write--> alive
/// alive --dispose--> disposed
/// alive --unregister--> unregistered
/// disposed --unregister--> disposed_unregistered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    Disposed,
    Unregistered,
    DisposedUnregistered,
}

impl InstanceState {
    /// Terminal states are reclaimed once the instance has no pending
    /// samples and no reader still holds unacked ones.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Unregistered | InstanceState::DisposedUnregistered
        )
    }

    /// Writes are only legal against a registered, live instance.
    #[must_use]
    pub fn accepts_writes(&self) -> bool {
        matches!(self, InstanceState::Alive)
    }
}

/// Registered instance bookkeeping.
pub(crate) struct InstanceEntry {
    /// Serialized key fields, kept for `key_value` reconstruction.
    pub key: Vec<u8>,
    pub state: InstanceState,
    /// Strength under exclusive-ownership QoS; announced through discovery,
    /// arbitration happens reader-side.
    #[allow(dead_code)]
    pub strength: OwnershipStrength,
}

/// Per-writer registry of known instances.
pub(crate) struct InstanceRegistry {
    entries: HashMap<InstanceHandle, InstanceEntry>,
    max_instances: usize,
}

impl InstanceRegistry {
    pub(crate) fn new(max_instances: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_instances,
        }
    }

    /// Register (or revive) the instance for `key`. Idempotent: an existing
    /// registration returns the same handle.
    pub(crate) fn register(
        &mut self,
        key: &[u8],
        strength: OwnershipStrength,
    ) -> Result<InstanceHandle> {
        let handle = instance_handle_from_key(key);
        if let Some(entry) = self.entries.get_mut(&handle) {
            // Re-registering a previously unregistered instance revives it.
            if entry.state.is_terminal() {
                entry.state = InstanceState::Alive;
            }
            return Ok(handle);
        }

        if self.max_instances != LENGTH_UNLIMITED && self.entries.len() >= self.max_instances {
            return Err(Error::OutOfResources(format!(
                "max_instances ({}) reached",
                self.max_instances
            )));
        }

        self.entries.insert(
            handle,
            InstanceEntry {
                key: key.to_vec(),
                state: InstanceState::Alive,
                strength,
            },
        );
        Ok(handle)
    }

    /// Query without registering.
    pub(crate) fn lookup(&self, key: &[u8]) -> InstanceHandle {
        let handle = instance_handle_from_key(key);
        if self.entries.contains_key(&handle) {
            handle
        } else {
            InstanceHandle::NIL
        }
    }

    pub(crate) fn get(&self, handle: InstanceHandle) -> Option<&InstanceEntry> {
        self.entries.get(&handle)
    }

    pub(crate) fn state(&self, handle: InstanceHandle) -> Option<InstanceState> {
        self.entries.get(&handle).map(|e| e.state)
    }

    /// Resolve the handle a mutating operation targets: a supplied handle
    /// must name a known instance whose key matches the sample's; a nil
    /// handle derives the instance from the key fields.
    pub(crate) fn resolve(&self, supplied: InstanceHandle, key: &[u8]) -> Result<InstanceHandle> {
        if supplied.is_nil() {
            let handle = self.lookup(key);
            if handle.is_nil() {
                return Err(Error::PreconditionNotMet(
                    "instance is not registered".to_string(),
                ));
            }
            return Ok(handle);
        }
        match self.entries.get(&supplied) {
            Some(entry) if entry.key == key || key.is_empty() => Ok(supplied),
            Some(_) => Err(Error::PreconditionNotMet(
                "instance handle does not match the sample key".to_string(),
            )),
            None => Err(Error::PreconditionNotMet("stale instance handle".to_string())),
        }
    }

    /// Dispose transition.
    pub(crate) fn dispose(&mut self, handle: InstanceHandle) -> Result<InstanceState> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or_else(|| Error::PreconditionNotMet("unknown instance".to_string()))?;
        entry.state = match entry.state {
            InstanceState::Alive | InstanceState::Disposed => InstanceState::Disposed,
            InstanceState::Unregistered | InstanceState::DisposedUnregistered => {
                InstanceState::DisposedUnregistered
            }
        };
        Ok(entry.state)
    }

    /// Unregister transition. Unregistering twice is a precondition error.
    pub(crate) fn unregister(&mut self, handle: InstanceHandle) -> Result<InstanceState> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or_else(|| Error::PreconditionNotMet("unknown instance".to_string()))?;
        entry.state = match entry.state {
            InstanceState::Alive => InstanceState::Unregistered,
            InstanceState::Disposed => InstanceState::DisposedUnregistered,
            InstanceState::Unregistered | InstanceState::DisposedUnregistered => {
                return Err(Error::PreconditionNotMet(
                    "instance already unregistered".to_string(),
                ));
            }
        };
        Ok(entry.state)
    }

    /// Reclaim a terminal instance. The caller guarantees the drain
    /// condition (no pending samples, no unacked readers).
    pub(crate) fn remove_terminal(&mut self, handle: InstanceHandle) -> bool {
        match self.entries.get(&handle) {
            Some(entry) if entry.state.is_terminal() => {
                self.entries.remove(&handle);
                true
            }
            _ => false,
        }
    }

    /// Handles of instances still accepting writes (used for autodispose on
    /// writer deletion).
    pub(crate) fn alive_handles(&self) -> Vec<InstanceHandle> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state.accepts_writes())
            .map(|(&h, _)| h)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
