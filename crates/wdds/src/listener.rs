// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Writer listener trait and status structs.
//!
//! Infrastructure-plane events (missed deadlines, lost liveliness,
//! incompatible QoS, publication matches) never fail an API call; they
//! update the corresponding status struct and, when the writer's status mask
//! enables it, invoke the listener. The status is reset (deltas zeroed)
//! before the callback runs, so a listener that re-reads it observes zero
//! deltas.
//!
//! # Thread Safety
//!
//! Callbacks are invoked from background threads (event loop, reliability
//! path). They must be `Send + Sync` and should not block or panic.

use crate::core::types::{Guid, InstanceHandle};
use crate::qos::PolicyId;

use parking_lot::Mutex;

/// Bitmask selecting which listener callbacks are eligible to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const OFFERED_DEADLINE_MISSED: StatusMask = StatusMask(1 << 0);
    pub const OFFERED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 1);
    pub const LIVELINESS_LOST: StatusMask = StatusMask(1 << 2);
    pub const PUBLICATION_MATCHED: StatusMask = StatusMask(1 << 3);

    /// Every writer status bit.
    #[must_use]
    pub fn all() -> Self {
        StatusMask(
            Self::OFFERED_DEADLINE_MISSED.0
                | Self::OFFERED_INCOMPATIBLE_QOS.0
                | Self::LIVELINESS_LOST.0
                | Self::PUBLICATION_MATCHED.0,
        )
    }

    /// No bits; the listener never fires.
    #[must_use]
    pub fn none() -> Self {
        StatusMask(0)
    }

    #[must_use]
    pub fn contains(&self, other: StatusMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, other: StatusMask) -> Self {
        StatusMask(self.0 | other.0)
    }
}

impl Default for StatusMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Status for `on_offered_deadline_missed`.
#[derive(Debug, Clone, Default)]
pub struct OfferedDeadlineMissedStatus {
    /// Total cumulative count of missed deadlines.
    pub total_count: u32,
    /// Change in total_count since last read.
    pub total_count_change: i32,
    /// Instance that missed its deadline most recently.
    pub last_instance_handle: Option<InstanceHandle>,
}

/// Status for `on_offered_incompatible_qos`.
#[derive(Debug, Clone, Default)]
pub struct OfferedIncompatibleQosStatus {
    /// Total cumulative count of incompatible matches.
    pub total_count: u32,
    /// Change in total_count since last read.
    pub total_count_change: i32,
    /// Policy that failed the last compatibility check.
    pub last_policy_id: Option<PolicyId>,
}

/// Status for `on_liveliness_lost`.
#[derive(Debug, Clone, Default)]
pub struct LivelinessLostStatus {
    /// Total cumulative count of lost-liveliness episodes.
    pub total_count: u32,
    /// Change in total_count since last read.
    pub total_count_change: i32,
}

/// Status for `on_publication_matched`.
#[derive(Debug, Clone, Default)]
pub struct PublicationMatchedStatus {
    /// Total cumulative count of matched subscriptions.
    pub total_count: u32,
    /// Change in total_count since last read.
    pub total_count_change: i32,
    /// Current number of matched subscriptions.
    pub current_count: u32,
    /// Change in current_count since last read.
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<Guid>,
}

/// Listener for DataWriter events.
///
/// All methods have default no-op implementations, so implementors only
/// override the events they care about.
pub trait DataWriterListener: Send + Sync {
    /// Called when an instance missed its offered deadline.
    fn on_offered_deadline_missed(&self, status: OfferedDeadlineMissedStatus) {
        let _ = status;
    }

    /// Called when a discovered reader requested QoS this writer cannot
    /// offer; the reader is not matched.
    fn on_offered_incompatible_qos(&self, status: OfferedIncompatibleQosStatus) {
        let _ = status;
    }

    /// Called when a manual-liveliness writer failed to assert within its
    /// lease.
    fn on_liveliness_lost(&self, status: LivelinessLostStatus) {
        let _ = status;
    }

    /// Called when the writer matches or unmatches a reader.
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        let _ = status;
    }
}

/// No-op listener used when the application supplies none.
pub struct NoOpListener;

impl DataWriterListener for NoOpListener {}

/// Accumulates writer statuses and implements the read-and-reset contract.
#[derive(Default)]
pub(crate) struct StatusCollector {
    deadline: Mutex<OfferedDeadlineMissedStatus>,
    incompatible: Mutex<OfferedIncompatibleQosStatus>,
    liveliness: Mutex<LivelinessLostStatus>,
    matched: Mutex<PublicationMatchedStatus>,
}

impl StatusCollector {
    /// Record one missed deadline, returning the pre-reset snapshot for the
    /// listener.
    pub(crate) fn deadline_missed(
        &self,
        instance: InstanceHandle,
    ) -> OfferedDeadlineMissedStatus {
        let mut status = self.deadline.lock();
        status.total_count += 1;
        status.total_count_change += 1;
        status.last_instance_handle = Some(instance);
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn incompatible_qos(&self, policy: PolicyId) -> OfferedIncompatibleQosStatus {
        let mut status = self.incompatible.lock();
        status.total_count += 1;
        status.total_count_change += 1;
        status.last_policy_id = Some(policy);
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn liveliness_lost(&self) -> LivelinessLostStatus {
        let mut status = self.liveliness.lock();
        status.total_count += 1;
        status.total_count_change += 1;
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn reader_matched(&self, reader: Guid) -> PublicationMatchedStatus {
        let mut status = self.matched.lock();
        status.total_count += 1;
        status.total_count_change += 1;
        status.current_count += 1;
        status.current_count_change += 1;
        status.last_subscription_handle = Some(reader);
        let snapshot = status.clone();
        status.total_count_change = 0;
        status.current_count_change = 0;
        snapshot
    }

    pub(crate) fn reader_unmatched(&self, reader: Guid) -> PublicationMatchedStatus {
        let mut status = self.matched.lock();
        status.current_count = status.current_count.saturating_sub(1);
        status.current_count_change -= 1;
        status.last_subscription_handle = Some(reader);
        let snapshot = status.clone();
        status.total_count_change = 0;
        status.current_count_change = 0;
        snapshot
    }

    /// Application-side reads (also reset deltas).
    pub(crate) fn read_deadline(&self) -> OfferedDeadlineMissedStatus {
        let mut status = self.deadline.lock();
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn read_incompatible(&self) -> OfferedIncompatibleQosStatus {
        let mut status = self.incompatible.lock();
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn read_liveliness(&self) -> LivelinessLostStatus {
        let mut status = self.liveliness.lock();
        let snapshot = status.clone();
        status.total_count_change = 0;
        snapshot
    }

    pub(crate) fn read_matched(&self) -> PublicationMatchedStatus {
        let mut status = self.matched.lock();
        let snapshot = status.clone();
        status.total_count_change = 0;
        status.current_count_change = 0;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_contains() {
        let mask = StatusMask::none().with(StatusMask::LIVELINESS_LOST);
        assert!(mask.contains(StatusMask::LIVELINESS_LOST));
        assert!(!mask.contains(StatusMask::PUBLICATION_MATCHED));
        assert!(StatusMask::all().contains(StatusMask::OFFERED_DEADLINE_MISSED));
    }

    #[test]
    fn test_deadline_status_resets_after_snapshot() {
        let collector = StatusCollector::default();

        let s1 = collector.deadline_missed(InstanceHandle(7));
        assert_eq!(s1.total_count, 1);
        assert_eq!(s1.total_count_change, 1);
        assert_eq!(s1.last_instance_handle, Some(InstanceHandle(7)));

        // A re-read right after the callback sees zero delta.
        let s2 = collector.read_deadline();
        assert_eq!(s2.total_count, 1);
        assert_eq!(s2.total_count_change, 0);
    }

    #[test]
    fn test_deadline_status_accumulates_total() {
        let collector = StatusCollector::default();
        collector.deadline_missed(InstanceHandle(1));
        let s = collector.deadline_missed(InstanceHandle(2));
        assert_eq!(s.total_count, 2);
        assert_eq!(s.total_count_change, 1);
        assert_eq!(s.last_instance_handle, Some(InstanceHandle(2)));
    }

    #[test]
    fn test_matched_counts() {
        let collector = StatusCollector::default();
        let guid = Guid::from_bytes([3u8; 16]);

        let s1 = collector.reader_matched(guid);
        assert_eq!(s1.total_count, 1);
        assert_eq!(s1.current_count, 1);
        assert_eq!(s1.current_count_change, 1);

        let s2 = collector.reader_unmatched(guid);
        assert_eq!(s2.total_count, 1);
        assert_eq!(s2.current_count, 0);
        assert_eq!(s2.current_count_change, -1);

        let s3 = collector.read_matched();
        assert_eq!(s3.current_count_change, 0);
    }

    #[test]
    fn test_incompatible_qos_records_policy() {
        let collector = StatusCollector::default();
        let s = collector.incompatible_qos(PolicyId::Reliability);
        assert_eq!(s.total_count, 1);
        assert_eq!(s.last_policy_id, Some(PolicyId::Reliability));
    }

    #[test]
    fn test_noop_listener_does_not_panic() {
        let listener = NoOpListener;
        listener.on_offered_deadline_missed(OfferedDeadlineMissedStatus::default());
        listener.on_offered_incompatible_qos(OfferedIncompatibleQosStatus::default());
        listener.on_liveliness_lost(LivelinessLostStatus::default());
        listener.on_publication_matched(PublicationMatchedStatus::default());
    }
}
