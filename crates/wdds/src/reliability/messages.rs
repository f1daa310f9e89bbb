// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Control and data message shapes on the writer/reader wire.
//!
//! Bit-exact RTPS submessage framing is out of scope; these carriers keep
//! the protocol roles (DATA, HEARTBEAT, GAP, ACKNACK, NACK_FRAG) with a
//! compact little-endian layout so the reliability engine and the flow
//! controller can be exercised end to end.

use std::convert::TryInto;

use crate::core::types::{ChangeKind, Guid, Timestamp};

/// Leading tag byte identifying the message role (RTPS submessage ids).
pub mod tag {
    pub const ACKNACK: u8 = 0x06;
    pub const HEARTBEAT: u8 = 0x07;
    pub const GAP: u8 = 0x08;
    pub const NACK_FRAG: u8 = 0x12;
    pub const DATA: u8 = 0x15;
    pub const DATA_FRAG: u8 = 0x16;
}

/// Bytes the data header adds in front of the serialized payload; the
/// fragmentation budget subtracts this overhead.
pub const DATA_HEADER_LEN: usize = 16 + 8 + 1 + 1 + 8 + 8 + 4 + 4 + 4;

/// Header preceding a (possibly fragmented) payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMsg {
    pub writer_guid: Guid,
    pub sequence_number: u64,
    pub kind: ChangeKind,
    pub source_timestamp: Timestamp,
    /// Coherent-set id, 0 when the sample is not part of a set.
    pub coherent_set: u64,
    /// Total payload length across all fragments.
    pub payload_len: u32,
    /// 0 for unfragmented data.
    pub fragment_size: u32,
    /// 1-based fragment number; 0 for unfragmented data.
    pub fragment_number: u32,
}

impl DataMsg {
    /// Encode the header; the payload (or fragment) is sent as the second
    /// gather buffer.
    #[must_use]
    pub fn encode(&self) -> [u8; DATA_HEADER_LEN] {
        let mut buf = [0u8; DATA_HEADER_LEN];
        buf[0..16].copy_from_slice(&self.writer_guid.to_bytes());
        buf[16..24].copy_from_slice(&self.sequence_number.to_le_bytes());
        buf[24] = self.kind.as_u8();
        buf[25] = u8::from(self.coherent_set != 0);
        buf[26..34].copy_from_slice(&self.source_timestamp.as_nanos().to_le_bytes());
        buf[34..42].copy_from_slice(&self.coherent_set.to_le_bytes());
        buf[42..46].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[46..50].copy_from_slice(&self.fragment_size.to_le_bytes());
        buf[50..54].copy_from_slice(&self.fragment_number.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < DATA_HEADER_LEN {
            return None;
        }
        Some(Self {
            writer_guid: Guid::from_bytes(buf[0..16].try_into().ok()?),
            sequence_number: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            kind: ChangeKind::from_u8(buf[24])?,
            source_timestamp: Timestamp::from_nanos(u64::from_le_bytes(
                buf[26..34].try_into().ok()?,
            )),
            coherent_set: u64::from_le_bytes(buf[34..42].try_into().ok()?),
            payload_len: u32::from_le_bytes(buf[42..46].try_into().ok()?),
            fragment_size: u32::from_le_bytes(buf[46..50].try_into().ok()?),
            fragment_number: u32::from_le_bytes(buf[50..54].try_into().ok()?),
        })
    }
}

/// Writer announces its available sequence range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMsg {
    /// Oldest sequence still held in the writer history.
    pub first_seq: u64,
    /// Newest sequence written.
    pub last_seq: u64,
    /// Monotonic heartbeat counter (anti-replay).
    pub count: u32,
    /// Writer asserts liveliness with this heartbeat.
    pub liveliness: bool,
}

impl HeartbeatMsg {
    #[must_use]
    pub fn new(first_seq: u64, last_seq: u64, count: u32) -> Self {
        Self {
            first_seq,
            last_seq,
            count,
            liveliness: false,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; 21] {
        let mut buf = [0u8; 21];
        buf[0..8].copy_from_slice(&self.first_seq.to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_seq.to_le_bytes());
        buf[16..20].copy_from_slice(&self.count.to_le_bytes());
        buf[20] = u8::from(self.liveliness);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 21 {
            return None;
        }
        Some(Self {
            first_seq: u64::from_le_bytes(buf[0..8].try_into().ok()?),
            last_seq: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            count: u32::from_le_bytes(buf[16..20].try_into().ok()?),
            liveliness: buf[20] != 0,
        })
    }
}

/// Writer declares `[start, end)` irrecoverable; the reader advances past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapMsg {
    pub start: u64,
    pub end: u64,
}

impl GapMsg {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start < end, "empty gap range");
        Self { start, end }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.start.to_le_bytes());
        buf[8..16].copy_from_slice(&self.end.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 16 {
            return None;
        }
        let start = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let end = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        (start < end).then_some(Self { start, end })
    }

    /// Number of sequences covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Reader acknowledgment: everything below `acked_base` was received;
/// `nacked` lists missing sequences at or above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNackMsg {
    pub reader_guid: Guid,
    /// Next sequence the reader expects (all lower sequences are acked).
    pub acked_base: u64,
    /// Missing sequences requested for retransmission, ascending.
    pub nacked: Vec<u64>,
    /// True when the reader needs no heartbeat response.
    pub final_flag: bool,
}

impl AckNackMsg {
    #[must_use]
    pub fn new(reader_guid: Guid, acked_base: u64, nacked: Vec<u64>) -> Self {
        debug_assert!(nacked.windows(2).all(|w| w[0] < w[1]), "nack set not sorted");
        Self {
            reader_guid,
            acked_base,
            nacked,
            final_flag: false,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 8 + 1 + 4 + self.nacked.len() * 8);
        buf.extend_from_slice(&self.reader_guid.to_bytes());
        buf.extend_from_slice(&self.acked_base.to_le_bytes());
        buf.push(u8::from(self.final_flag));
        let count = u32::try_from(self.nacked.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for seq in &self.nacked {
            buf.extend_from_slice(&seq.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 29 {
            return None;
        }
        let reader_guid = Guid::from_bytes(buf[0..16].try_into().ok()?);
        let acked_base = u64::from_le_bytes(buf[16..24].try_into().ok()?);
        let final_flag = buf[24] != 0;
        let count = u32::from_le_bytes(buf[25..29].try_into().ok()?) as usize;
        let mut nacked = Vec::with_capacity(count);
        let mut offset = 29;
        for _ in 0..count {
            if buf.len() < offset + 8 {
                return None;
            }
            nacked.push(u64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?));
            offset += 8;
        }
        Some(Self {
            reader_guid,
            acked_base,
            nacked,
            final_flag,
        })
    }
}

/// Reader requests specific fragments of one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackFragMsg {
    pub reader_guid: Guid,
    pub sequence_number: u64,
    /// Missing fragment numbers (1-based), ascending.
    pub missing: Vec<u32>,
}

impl NackFragMsg {
    #[must_use]
    pub fn new(reader_guid: Guid, sequence_number: u64, missing: Vec<u32>) -> Self {
        Self {
            reader_guid,
            sequence_number,
            missing,
        }
    }
}
