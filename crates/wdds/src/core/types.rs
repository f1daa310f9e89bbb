// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Identity and metadata primitives shared by the publication path.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a GUID prefix in bytes.
pub const GUID_PREFIX_LEN: usize = 12;

/// GUID prefix identifying one participant.
pub type GuidPrefix = [u8; GUID_PREFIX_LEN];

/// Entity identifier within a participant (3-byte key + kind octet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    /// Entity id reserved for the participant itself.
    pub const PARTICIPANT: EntityId = EntityId([0x00, 0x00, 0x01, 0xC1]);

    /// Build a user-defined writer entity id from a 24-bit key.
    #[must_use]
    pub fn user_writer(key: u32) -> Self {
        let k = key.to_be_bytes();
        // 0x02 = user-defined writer with key, 0x03 = keyless
        EntityId([k[1], k[2], k[3], 0x02])
    }
}

/// Global unique identifier of an endpoint (prefix + entity id).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// Construct from prefix and entity id.
    #[must_use]
    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// All-zero GUID, used as "unknown".
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Flatten to 16 bytes for registry keys and persistence.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..GUID_PREFIX_LEN].copy_from_slice(&self.prefix);
        out[GUID_PREFIX_LEN..].copy_from_slice(&self.entity_id.0);
        out
    }

    /// Rebuild from the 16-byte flattened form.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&bytes[..GUID_PREFIX_LEN]);
        let mut eid = [0u8; 4];
        eid.copy_from_slice(&bytes[GUID_PREFIX_LEN..]);
        Self {
            prefix,
            entity_id: EntityId(eid),
        }
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque handle identifying one (topic, key) instance as seen by one writer.
///
/// Handles are local to the writer that minted them and are not
/// interchangeable across writers. The nil handle (0) means "derive the
/// instance from the sample's key fields".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct InstanceHandle(pub u64);

impl InstanceHandle {
    /// The reserved nil handle.
    pub const NIL: InstanceHandle = InstanceHandle(0);

    /// True when this is the nil handle.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }
}

/// Source timestamp in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(current_time_ns())
    }

    /// Construct from nanoseconds since the Unix epoch.
    #[must_use]
    pub fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Nanoseconds since the Unix epoch.
    #[must_use]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn current_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Kind of a cached sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeKind {
    /// Regular data update.
    #[default]
    Alive,
    /// Instance disposed by the writer.
    NotAliveDisposed,
    /// Instance unregistered by the writer.
    NotAliveUnregistered,
    /// Instance disposed and unregistered in one step.
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    /// True for the `not_alive_*` kinds, which are only legal on keyed topics.
    #[must_use]
    pub fn is_not_alive(&self) -> bool {
        !matches!(self, ChangeKind::Alive)
    }

    /// Stable numeric tag for persistence.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => 1,
            ChangeKind::NotAliveUnregistered => 2,
            ChangeKind::NotAliveDisposedUnregistered => 3,
        }
    }

    /// Inverse of [`ChangeKind::as_u8`].
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ChangeKind::Alive),
            1 => Some(ChangeKind::NotAliveDisposed),
            2 => Some(ChangeKind::NotAliveUnregistered),
            3 => Some(ChangeKind::NotAliveDisposedUnregistered),
            _ => None,
        }
    }
}

/// Whether a topic carries key fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicKind {
    /// Every sample belongs to the single anonymous instance.
    #[default]
    Unkeyed,
    /// Samples are partitioned into instances by their key fields.
    Keyed,
}

/// Named data channel with an associated type. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    type_name: String,
    kind: TopicKind,
}

impl Topic {
    /// Create a topic descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind,
        }
    }

    /// Topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Keyed or unkeyed.
    #[must_use]
    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// True when the topic partitions samples by key.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        self.kind == TopicKind::Keyed
    }
}

/// Hash key bytes into a non-nil instance handle.
///
/// Uses FNV-1a; a zero digest is remapped so the nil handle stays reserved.
#[must_use]
pub fn instance_handle_from_key(key: &[u8]) -> InstanceHandle {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for b in key {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 {
        hash = FNV_OFFSET;
    }
    InstanceHandle(hash)
}
