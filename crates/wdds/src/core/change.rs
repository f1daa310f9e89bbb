// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Cache change - the unit of publication.

use super::pool::{ChangeIndex, PayloadHandle};
use super::types::{ChangeKind, Guid, InstanceHandle, Timestamp};

/// Serialized payload reference into the [`PayloadPool`](super::pool::PayloadPool).
///
/// The pool outlives every change that references it; the handle is returned
/// to the pool exactly once, when the change leaves its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// Slot in the owning payload pool.
    pub handle: PayloadHandle,
    /// Serialized length in bytes (the slot may be larger).
    pub len: u32,
}

/// Scheduling state owned by the flow controller.
///
/// `prev`/`next` are both `Some` exactly while the change is linked into a
/// flow-controller queue (queues are sentinel-delimited), and both `None`
/// otherwise. The transition happens under the owning writer's mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterInfo {
    pub prev: Option<ChangeIndex>,
    pub next: Option<ChangeIndex>,
    /// Number of submessages emitted for this change (fragments count once
    /// per fragment).
    pub submessages_sent: u32,
}

impl WriterInfo {
    /// True while the change sits in a flow-controller queue.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        debug_assert_eq!(
            self.prev.is_some(),
            self.next.is_some(),
            "intrusive links out of sync"
        );
        self.prev.is_some()
    }
}

/// One published value plus its metadata.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub writer_guid: Guid,
    /// Strictly increasing per writer, starting at 1.
    pub sequence_number: u64,
    pub instance_handle: InstanceHandle,
    pub kind: ChangeKind,
    pub source_timestamp: Timestamp,
    /// Absent for pure dispose/unregister changes.
    pub payload: Option<Payload>,
    /// 0 when the change fits one datagram; otherwise the fragment size the
    /// flow controller slices the payload into.
    pub fragment_size: u32,
    /// Coherent-set id stamped between begin/end coherent changes.
    pub coherent_set: Option<u64>,
    pub writer_info: WriterInfo,
}

impl CacheChange {
    /// Build an alive change carrying a payload.
    #[must_use]
    pub fn alive(
        writer_guid: Guid,
        sequence_number: u64,
        instance_handle: InstanceHandle,
        source_timestamp: Timestamp,
        payload: Payload,
    ) -> Self {
        Self {
            writer_guid,
            sequence_number,
            instance_handle,
            kind: ChangeKind::Alive,
            source_timestamp,
            payload: Some(payload),
            fragment_size: 0,
            coherent_set: None,
            writer_info: WriterInfo::default(),
        }
    }

    /// Build a dispose/unregister change without payload.
    #[must_use]
    pub fn not_alive(
        writer_guid: Guid,
        sequence_number: u64,
        instance_handle: InstanceHandle,
        kind: ChangeKind,
        source_timestamp: Timestamp,
    ) -> Self {
        debug_assert!(kind.is_not_alive());
        Self {
            writer_guid,
            sequence_number,
            instance_handle,
            kind,
            source_timestamp,
            payload: None,
            fragment_size: 0,
            coherent_set: None,
            writer_info: WriterInfo::default(),
        }
    }

    /// Serialized payload length (0 for payload-less changes).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.map(|p| p.len as usize).unwrap_or(0)
    }

    /// Number of fragments this change is sliced into (1 if unfragmented).
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        if self.fragment_size == 0 {
            return 1;
        }
        let len = self.payload_len() as u64;
        let frag = u64::from(self.fragment_size);
        u32::try_from(len.div_ceil(frag).max(1)).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::instance_handle_from_key;

    fn guid() -> Guid {
        Guid::from_bytes([1u8; 16])
    }

    #[test]
    fn test_alive_change_defaults() {
        let change = CacheChange::alive(
            guid(),
            1,
            instance_handle_from_key(b"k"),
            Timestamp::from_nanos(5),
            Payload {
                handle: PayloadHandle(0),
                len: 16,
            },
        );

        assert_eq!(change.kind, ChangeKind::Alive);
        assert_eq!(change.payload_len(), 16);
        assert_eq!(change.fragment_count(), 1);
        assert!(!change.writer_info.is_linked());
    }

    #[test]
    fn test_not_alive_has_no_payload() {
        let change = CacheChange::not_alive(
            guid(),
            2,
            instance_handle_from_key(b"k"),
            ChangeKind::NotAliveDisposed,
            Timestamp::from_nanos(5),
        );

        assert!(change.payload.is_none());
        assert_eq!(change.payload_len(), 0);
    }

    #[test]
    fn test_fragment_count() {
        let mut change = CacheChange::alive(
            guid(),
            3,
            InstanceHandle(1),
            Timestamp::from_nanos(1),
            Payload {
                handle: PayloadHandle(0),
                len: 10_000,
            },
        );

        change.fragment_size = 4096;
        assert_eq!(change.fragment_count(), 3);

        change.fragment_size = 10_000;
        assert_eq!(change.fragment_count(), 1);
    }
}
