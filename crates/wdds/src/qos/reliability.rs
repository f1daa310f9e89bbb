// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! RELIABILITY, HISTORY, DURABILITY and RESOURCE_LIMITS policies.

use std::time::Duration;

/// Delivery guarantee offered by a writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReliabilityKind {
    /// Fire-and-forget; changes are eligible for removal right after
    /// delivery and are never retransmitted.
    #[default]
    BestEffort,
    /// Acknowledged delivery with heartbeat/acknack retransmission.
    Reliable,
}

/// RELIABILITY policy: kind plus the longest a mutating call may block when
/// the history is full or acknowledgments are outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    pub max_blocking_time: Duration,
}

impl Reliability {
    /// Default blocking budget, matching the common DDS 100 ms default.
    pub const DEFAULT_MAX_BLOCKING: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: Self::DEFAULT_MAX_BLOCKING,
        }
    }

    #[must_use]
    pub fn reliable(max_blocking_time: Duration) -> Self {
        Self {
            kind: ReliabilityKind::Reliable,
            max_blocking_time,
        }
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.kind == ReliabilityKind::Reliable
    }

    /// RxO: a reliable reader cannot be served by a best-effort writer.
    #[must_use]
    pub fn is_compatible_with(&self, requested: ReliabilityKind) -> bool {
        !(requested == ReliabilityKind::Reliable && self.kind == ReliabilityKind::BestEffort)
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Self::best_effort()
    }
}

/// HISTORY policy: how many changes to keep per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Keep the newest `n` changes per instance, evicting the oldest.
    KeepLast(u32),
    /// Keep everything within the resource limits; inserts block (up to
    /// max_blocking_time) once a limit is reached.
    KeepAll,
}

impl History {
    #[must_use]
    pub fn depth(&self) -> Option<u32> {
        match self {
            History::KeepLast(n) => Some(*n),
            History::KeepAll => None,
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(1)
    }
}

/// DURABILITY policy: writer-side retention after delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum Durability {
    /// Remove changes as soon as every currently-matched reader got them.
    #[default]
    Volatile,
    /// Retain delivered changes (within history limits) for late joiners,
    /// for the writer's lifetime.
    TransientLocal,
    /// Retain beyond the writer's lifetime in a durability service.
    Transient,
    /// Retain in a persistence backend across writer restarts.
    Persistent,
}

impl Durability {
    /// RxO: offered durability must be at least the requested level.
    #[must_use]
    pub fn is_compatible_with(&self, requested: Durability) -> bool {
        *self >= requested
    }

    /// True for the kinds that restore/retain through a backend.
    #[must_use]
    pub fn uses_durability_service(&self) -> bool {
        matches!(self, Durability::Transient | Durability::Persistent)
    }
}

/// RESOURCE_LIMITS policy bounding the writer history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum total changes across all instances.
    pub max_samples: usize,
    /// Maximum distinct instances.
    pub max_instances: usize,
    /// Maximum changes per instance.
    pub max_samples_per_instance: usize,
}

/// "No limit" sentinel, the DDS LENGTH_UNLIMITED analogue.
pub const LENGTH_UNLIMITED: usize = usize::MAX;

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: 400,
        }
    }
}

/// DURABILITY_SERVICE policy: cleanup delay and history the durability
/// service applies on the writer's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurabilityService {
    /// Extra delay before a terminal instance's state is removed.
    pub service_cleanup_delay: Duration,
    pub history: History,
    pub limits: ResourceLimits,
}

impl Default for DurabilityService {
    fn default() -> Self {
        Self {
            service_cleanup_delay: Duration::ZERO,
            history: History::KeepLast(1),
            limits: ResourceLimits::default(),
        }
    }
}
