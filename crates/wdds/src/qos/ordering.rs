// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! DESTINATION_ORDER and PRESENTATION QoS policies.

/// How readers order samples of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DestinationOrderKind {
    /// Order by arrival at the reader.
    #[default]
    ByReceptionTimestamp,
    /// Order by the writer-side source timestamp.
    BySourceTimestamp,
}

/// DESTINATION_ORDER policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestinationOrder {
    pub kind: DestinationOrderKind,
}

impl DestinationOrder {
    #[must_use]
    pub fn by_reception_timestamp() -> Self {
        Self {
            kind: DestinationOrderKind::ByReceptionTimestamp,
        }
    }

    #[must_use]
    pub fn by_source_timestamp() -> Self {
        Self {
            kind: DestinationOrderKind::BySourceTimestamp,
        }
    }

    /// RxO: by-source offered satisfies by-reception requested, not the
    /// other way round.
    #[must_use]
    pub fn is_compatible_with(&self, requested: DestinationOrder) -> bool {
        self.kind >= requested.kind
    }
}

/// Granularity at which coherent/ordered access applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PresentationAccessScope {
    /// Per instance.
    #[default]
    Instance,
    /// Across instances of one topic.
    Topic,
    /// Across all writers of one publisher.
    Group,
}

/// PRESENTATION policy.
///
/// With `coherent_access` at scope >= Topic, contained writers must use
/// keep_all history so a coherent span can never be truncated by eviction;
/// writer creation fails with `PreconditionNotMet` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
}

impl Presentation {
    #[must_use]
    pub fn instance() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn coherent(access_scope: PresentationAccessScope) -> Self {
        Self {
            access_scope,
            coherent_access: true,
            ordered_access: false,
        }
    }

    /// True when contained writers are required to use keep_all history.
    #[must_use]
    pub fn requires_keep_all(&self) -> bool {
        self.coherent_access && self.access_scope >= PresentationAccessScope::Topic
    }
}
