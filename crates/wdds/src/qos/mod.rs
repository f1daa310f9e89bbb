// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Quality-of-Service policies for the publication path.
//!
//! One file per policy family; [`QoS`] aggregates the writer-relevant
//! policies and is validated fail-fast at writer creation.

/// Deadline QoS policy - expected per-instance update period.
pub mod deadline;
/// Writer data lifecycle QoS policy - autodispose on delete.
pub mod lifecycle;
/// Lifespan QoS policy - bounded sample lifetime.
pub mod lifespan;
/// Liveliness QoS policy - writer aliveness assertions.
pub mod liveliness;
/// Destination order and presentation QoS policies.
pub mod ordering;
/// Ownership QoS policies - exclusive vs shared writers.
pub mod ownership;
/// Reliability, history, durability and resource-limit policies.
pub mod reliability;
/// Transport priority QoS policy - scheduler hint.
pub mod transport_priority;

pub use deadline::Deadline;
pub use lifecycle::WriterDataLifecycle;
pub use lifespan::Lifespan;
pub use liveliness::{Liveliness, LivelinessKind};
pub use ordering::{DestinationOrder, DestinationOrderKind, Presentation, PresentationAccessScope};
pub use ownership::{Ownership, OwnershipStrength};
pub use reliability::{
    Durability, DurabilityService, History, Reliability, ReliabilityKind, ResourceLimits,
    LENGTH_UNLIMITED,
};
pub use transport_priority::TransportPriority;

use std::time::Duration;

/// Whether `write()` delivers on the caller thread or hands off to a
/// flow-controller worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Deliver from the calling thread (the flow controller may still divert
    /// to its worker on transport backpressure).
    #[default]
    Synchronous,
    /// Only enqueue; a flow-controller worker delivers later. Required for
    /// fragmented (oversized) samples.
    Asynchronous,
}

impl PublishMode {
    #[must_use]
    pub fn is_asynchronous(&self) -> bool {
        matches!(self, PublishMode::Asynchronous)
    }
}

/// Identifies the policy that failed a request-vs-offered compatibility
/// check, reported through `on_offered_incompatible_qos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyId {
    Reliability,
    Durability,
    Deadline,
    Liveliness,
    Ownership,
    DestinationOrder,
}

impl PolicyId {
    /// Standard DDS policy id numbering.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        match self {
            PolicyId::Durability => 2,
            PolicyId::Deadline => 4,
            PolicyId::Ownership => 6,
            PolicyId::Liveliness => 8,
            PolicyId::Reliability => 11,
            PolicyId::DestinationOrder => 12,
        }
    }

    /// Policy name as reported to listeners.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PolicyId::Reliability => "RELIABILITY",
            PolicyId::Durability => "DURABILITY",
            PolicyId::Deadline => "DEADLINE",
            PolicyId::Liveliness => "LIVELINESS",
            PolicyId::Ownership => "OWNERSHIP",
            PolicyId::DestinationOrder => "DESTINATION_ORDER",
        }
    }
}

/// QoS a discovered reader requests from matching writers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestedQos {
    pub reliability: ReliabilityKind,
    pub durability: Durability,
    pub deadline: Deadline,
    pub liveliness: Liveliness,
    pub ownership: Ownership,
    pub destination_order: DestinationOrder,
}

/// Aggregated writer QoS profile.
///
/// Immutable after writer creation except where DDS explicitly allows a
/// change; the writer rejects set-QoS on the immutable policies.
#[derive(Debug, Clone)]
pub struct QoS {
    pub reliability: Reliability,
    pub history: History,
    pub durability: Durability,
    pub resource_limits: ResourceLimits,
    pub deadline: Deadline,
    pub lifespan: Lifespan,
    pub liveliness: Liveliness,
    pub ownership: Ownership,
    pub ownership_strength: OwnershipStrength,
    pub destination_order: DestinationOrder,
    pub presentation: Presentation,
    pub transport_priority: TransportPriority,
    pub writer_data_lifecycle: WriterDataLifecycle,
    pub durability_service: DurabilityService,
    pub publish_mode: PublishMode,
}

impl Default for QoS {
    fn default() -> Self {
        Self::best_effort()
    }
}

impl QoS {
    /// Best-effort baseline profile.
    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            reliability: Reliability::best_effort(),
            history: History::KeepLast(100),
            durability: Durability::Volatile,
            resource_limits: ResourceLimits::default(),
            deadline: Deadline::infinite(),
            lifespan: Lifespan::infinite(),
            liveliness: Liveliness::infinite(),
            ownership: Ownership::Shared,
            ownership_strength: OwnershipStrength::default(),
            destination_order: DestinationOrder::by_reception_timestamp(),
            presentation: Presentation::instance(),
            transport_priority: TransportPriority::normal(),
            writer_data_lifecycle: WriterDataLifecycle::default(),
            durability_service: DurabilityService::default(),
            publish_mode: PublishMode::Synchronous,
        }
    }

    /// Reliable profile with the default blocking budget.
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::reliable(Reliability::DEFAULT_MAX_BLOCKING),
            ..Self::best_effort()
        }
    }

    // Builder-style refinements ---------------------------------------------

    #[must_use]
    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth);
        self
    }

    #[must_use]
    pub fn keep_all(mut self) -> Self {
        self.history = History::KeepAll;
        self
    }

    #[must_use]
    pub fn transient_local(mut self) -> Self {
        self.durability = Durability::TransientLocal;
        self
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.durability = Durability::Persistent;
        self
    }

    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.durability = Durability::Volatile;
        self
    }

    #[must_use]
    pub fn deadline(mut self, period: Duration) -> Self {
        self.deadline = Deadline::new(period);
        self
    }

    #[must_use]
    pub fn lifespan(mut self, duration: Duration) -> Self {
        self.lifespan = Lifespan::new(duration);
        self
    }

    #[must_use]
    pub fn liveliness(mut self, liveliness: Liveliness) -> Self {
        self.liveliness = liveliness;
        self
    }

    #[must_use]
    pub fn exclusive_ownership(mut self, strength: u32) -> Self {
        self.ownership = Ownership::Exclusive;
        self.ownership_strength = OwnershipStrength(strength);
        self
    }

    #[must_use]
    pub fn by_source_timestamp(mut self) -> Self {
        self.destination_order = DestinationOrder::by_source_timestamp();
        self
    }

    #[must_use]
    pub fn max_blocking_time(mut self, max_blocking_time: Duration) -> Self {
        self.reliability.max_blocking_time = max_blocking_time;
        self
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.publish_mode = PublishMode::Asynchronous;
        self
    }

    #[must_use]
    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    #[must_use]
    pub fn transport_priority(mut self, priority: i32) -> Self {
        self.transport_priority = TransportPriority(priority);
        self
    }

    // Validation ------------------------------------------------------------

    /// Check the profile for invalid combinations. Called at writer build.
    pub fn validate(&self) -> Result<(), String> {
        match self.history {
            History::KeepLast(0) => {
                return Err("History::KeepLast(n) requires n > 0".to_string());
            }
            History::KeepAll => {
                if self.resource_limits.max_samples == 0 {
                    return Err(
                        "History::KeepAll requires ResourceLimits.max_samples > 0".to_string()
                    );
                }
            }
            History::KeepLast(_) => {}
        }

        let rl = &self.resource_limits;
        if rl.max_instances != LENGTH_UNLIMITED
            && rl.max_samples_per_instance != LENGTH_UNLIMITED
            && rl.max_samples < rl.max_samples_per_instance.saturating_mul(rl.max_instances)
        {
            return Err(format!(
                "max_samples ({}) must be >= max_samples_per_instance ({}) * max_instances ({})",
                rl.max_samples, rl.max_samples_per_instance, rl.max_instances
            ));
        }

        if !self.liveliness.is_infinite()
            && self.liveliness.announcement_period > self.liveliness.lease_duration
        {
            return Err("liveliness announcement_period exceeds lease_duration".to_string());
        }

        Ok(())
    }

    /// Request-vs-offered check against a discovered reader.
    ///
    /// Returns the first incompatible policy; `Ok` means the reader can be
    /// matched.
    pub fn check_offered_against(&self, requested: &RequestedQos) -> Result<(), PolicyId> {
        if !self.reliability.is_compatible_with(requested.reliability) {
            return Err(PolicyId::Reliability);
        }
        if !self.durability.is_compatible_with(requested.durability) {
            return Err(PolicyId::Durability);
        }
        if !self.deadline.is_compatible_with(&requested.deadline) {
            return Err(PolicyId::Deadline);
        }
        if !self.liveliness.is_compatible_with(&requested.liveliness) {
            return Err(PolicyId::Liveliness);
        }
        if !self.ownership.is_compatible_with(requested.ownership) {
            return Err(PolicyId::Ownership);
        }
        if !self
            .destination_order
            .is_compatible_with(requested.destination_order)
        {
            return Err(PolicyId::DestinationOrder);
        }
        Ok(())
    }
}
