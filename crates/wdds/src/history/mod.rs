// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Writer-side sample history.
//!
//! Ordered container of pending changes addressable by sequence number and
//! partitioned into per-instance sub-queues. Enforces the history and
//! resource-limit QoS on insert, keeps per-instance deadline bookkeeping,
//! and expires samples past their lifespan oldest first.
//!
//! The history is not internally synchronized: it lives behind the owning
//! writer's mutex. A change detached here is not yet released - the writer
//! finishes removal once the flow controller and every matched-reader proxy
//! have let go of it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::core::change::CacheChange;
use crate::core::pool::{ChangeIndex, ChangePool, PayloadPool};
use crate::core::types::{InstanceHandle, Timestamp};
use crate::error::Error;
use crate::qos::{History, Lifespan, ResourceLimits, LENGTH_UNLIMITED};

/// Per-instance sub-queue state.
struct InstanceQueue {
    /// Sequence numbers of this instance's pending samples, oldest first.
    samples: VecDeque<u64>,
    /// Absolute time of the next offered-deadline expiry.
    next_deadline: Option<Instant>,
}

impl InstanceQueue {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            next_deadline: None,
        }
    }
}

/// Result of a successful insert.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Changes evicted by keep_last depth enforcement, oldest first. The
    /// caller must unlink them from the flow controller and the reader
    /// proxies (signalling "lost" to readers that had not acked) before
    /// releasing them.
    pub evicted: Vec<(u64, ChangeIndex)>,
}

/// Ordered, bounded container of one writer's pending changes.
pub struct WriterHistory {
    changes: BTreeMap<u64, ChangeIndex>,
    instances: HashMap<InstanceHandle, InstanceQueue>,
    history: History,
    limits: ResourceLimits,
    lifespan: Lifespan,
    change_pool: Arc<ChangePool>,
    payload_pool: Arc<PayloadPool>,
}

impl WriterHistory {
    #[must_use]
    pub fn new(
        history: History,
        limits: ResourceLimits,
        lifespan: Lifespan,
        change_pool: Arc<ChangePool>,
        payload_pool: Arc<PayloadPool>,
    ) -> Self {
        Self {
            changes: BTreeMap::new(),
            instances: HashMap::new(),
            history,
            limits,
            lifespan,
            change_pool,
            payload_pool,
        }
    }

    /// Insert an already-allocated change.
    ///
    /// keep_last evicts the oldest change of the target instance once its
    /// depth is reached; keep_all refuses with `WouldBlock` when a resource
    /// limit is hit (the writer turns that into blocking up to
    /// max_blocking_time). `max_instances` is only checked for an instance
    /// the history has never seen.
    pub fn insert(&mut self, idx: ChangeIndex) -> Result<InsertOutcome, Error> {
        let (seq, instance) = self
            .change_pool
            .with(idx, |c| (c.sequence_number, c.instance_handle));

        if !self.instances.contains_key(&instance)
            && self.limits.max_instances != LENGTH_UNLIMITED
            && self.instances.len() >= self.limits.max_instances
        {
            return Err(Error::OutOfResources(format!(
                "max_instances ({}) reached",
                self.limits.max_instances
            )));
        }

        let mut outcome = InsertOutcome::default();
        match self.history {
            History::KeepLast(depth) => {
                let queue = self.instances.entry(instance).or_insert_with(InstanceQueue::new);
                while queue.samples.len() >= depth as usize {
                    let Some(old_seq) = queue.samples.pop_front() else {
                        break;
                    };
                    if let Some(old_idx) = self.changes.remove(&old_seq) {
                        outcome.evicted.push((old_seq, old_idx));
                    }
                }
                // Total-samples bound still applies under keep_last.
                let overflow = if self.limits.max_samples != LENGTH_UNLIMITED
                    && self.changes.len() >= self.limits.max_samples
                {
                    self.changes.iter().next().map(|(&s, &i)| (s, i))
                } else {
                    None
                };
                if let Some((old_seq, old_idx)) = overflow {
                    self.detach_seq(old_seq);
                    outcome.evicted.push((old_seq, old_idx));
                }
            }
            History::KeepAll => {
                if self.limits.max_samples != LENGTH_UNLIMITED
                    && self.changes.len() >= self.limits.max_samples
                {
                    return Err(Error::WouldBlock);
                }
                let per_instance = self
                    .instances
                    .get(&instance)
                    .map(|q| q.samples.len())
                    .unwrap_or(0);
                if self.limits.max_samples_per_instance != LENGTH_UNLIMITED
                    && per_instance >= self.limits.max_samples_per_instance
                {
                    return Err(Error::WouldBlock);
                }
            }
        }

        self.changes.insert(seq, idx);
        self.instances
            .entry(instance)
            .or_insert_with(InstanceQueue::new)
            .samples
            .push_back(seq);
        Ok(outcome)
    }

    /// Detach a change by sequence number. Returns its index; the caller
    /// owns the remainder of removal.
    pub fn remove(&mut self, seq: u64) -> Option<ChangeIndex> {
        let idx = self.changes.remove(&seq)?;
        self.detach_from_instance(seq, idx);
        Some(idx)
    }

    /// Detach the oldest change.
    pub fn remove_min(&mut self) -> Option<(u64, ChangeIndex)> {
        let (&seq, &idx) = self.changes.iter().next()?;
        self.changes.remove(&seq);
        self.detach_from_instance(seq, idx);
        Some((seq, idx))
    }

    fn detach_seq(&mut self, seq: u64) {
        if let Some(idx) = self.changes.remove(&seq) {
            self.detach_from_instance(seq, idx);
        }
    }

    fn detach_from_instance(&mut self, seq: u64, idx: ChangeIndex) {
        let instance = self.change_pool.with(idx, |c| c.instance_handle);
        if let Some(queue) = self.instances.get_mut(&instance) {
            queue.samples.retain(|&s| s != seq);
        }
    }

    /// Drop an instance's (empty) sub-queue and its deadline slot. Used when
    /// a terminal instance is reclaimed.
    pub fn forget_instance(&mut self, instance: InstanceHandle) {
        if let Some(queue) = self.instances.get(&instance) {
            if queue.samples.is_empty() {
                self.instances.remove(&instance);
            }
        }
    }

    /// Arena index for `seq`.
    #[must_use]
    pub fn get(&self, seq: u64) -> Option<ChangeIndex> {
        self.changes.get(&seq).copied()
    }

    /// Iterate `[from, to]` inclusive in sequence order.
    #[must_use]
    pub fn range(&self, from: u64, to: u64) -> Vec<(u64, ChangeIndex)> {
        self.changes
            .range(from..=to)
            .map(|(&s, &i)| (s, i))
            .collect()
    }

    /// Oldest pending sequence number.
    #[must_use]
    pub fn earliest(&self) -> Option<u64> {
        self.changes.keys().next().copied()
    }

    /// Newest pending sequence number.
    #[must_use]
    pub fn latest(&self) -> Option<u64> {
        self.changes.keys().next_back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Pending samples of one instance.
    #[must_use]
    pub fn samples_for_instance(&self, instance: InstanceHandle) -> usize {
        self.instances
            .get(&instance)
            .map(|q| q.samples.len())
            .unwrap_or(0)
    }

    /// Instances currently holding samples or deadline state.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // Deadline bookkeeping --------------------------------------------------

    /// Arm/rearm the deadline slot of one instance.
    pub fn set_next_deadline(&mut self, instance: InstanceHandle, when: Instant) {
        self.instances
            .entry(instance)
            .or_insert_with(InstanceQueue::new)
            .next_deadline = Some(when);
    }

    /// Disarm one instance's deadline slot.
    pub fn clear_deadline(&mut self, instance: InstanceHandle) {
        if let Some(queue) = self.instances.get_mut(&instance) {
            queue.next_deadline = None;
        }
    }

    /// Earliest armed per-instance deadline, feeding the writer's deadline
    /// timer.
    #[must_use]
    pub fn get_earliest_deadline(&self) -> Option<(InstanceHandle, Instant)> {
        self.instances
            .iter()
            .filter_map(|(&h, q)| q.next_deadline.map(|d| (h, d)))
            .min_by_key(|&(_, d)| d)
    }

    // Lifespan --------------------------------------------------------------

    /// Earliest sample expiry, feeding the lifespan timer.
    #[must_use]
    pub fn earliest_expiry(&self) -> Option<(u64, Timestamp)> {
        if self.lifespan.is_infinite() {
            return None;
        }
        // Source timestamps are monotonic per writer, so the oldest sequence
        // also expires first.
        let (&seq, &idx) = self.changes.iter().next()?;
        let ts = self.change_pool.with(idx, |c| c.source_timestamp);
        self.lifespan.expiry_of(ts).map(|e| (seq, e))
    }

    /// Detach every change whose lifespan elapsed at `now`, oldest first.
    pub fn expire_older_than(&mut self, now: Timestamp) -> Vec<(u64, ChangeIndex)> {
        let mut expired = Vec::new();
        if self.lifespan.is_infinite() {
            return expired;
        }
        loop {
            let Some((&seq, &idx)) = self.changes.iter().next() else {
                break;
            };
            let ts = self.change_pool.with(idx, |c| c.source_timestamp);
            match self.lifespan.expiry_of(ts) {
                Some(expiry) if expiry <= now => {
                    self.changes.remove(&seq);
                    self.detach_from_instance(seq, idx);
                    expired.push((seq, idx));
                }
                _ => break,
            }
        }
        expired
    }

    // Release ---------------------------------------------------------------

    /// Return a detached change to the pools. The change must already be
    /// unlinked from every flow-controller queue.
    pub fn release_change(&self, idx: ChangeIndex) -> CacheChange {
        let change = self.change_pool.release(idx);
        if let Some(payload) = change.payload {
            self.payload_pool.release(payload.handle);
        }
        change
    }

    /// Detach everything, returning the indices oldest first (writer close).
    pub fn drain(&mut self) -> Vec<(u64, ChangeIndex)> {
        let out: Vec<_> = self.changes.iter().map(|(&s, &i)| (s, i)).collect();
        self.changes.clear();
        self.instances.clear();
        out
    }

    #[must_use]
    pub fn history_kind(&self) -> History {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::Payload;
    use crate::core::types::{ChangeKind, Guid, instance_handle_from_key};
    use std::time::Duration;

    struct Fixture {
        change_pool: Arc<ChangePool>,
        payload_pool: Arc<PayloadPool>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                change_pool: Arc::new(ChangePool::with_capacity(64)),
                payload_pool: Arc::new(PayloadPool::new()),
            }
        }

        fn history(&self, history: History, limits: ResourceLimits, lifespan: Lifespan) -> WriterHistory {
            WriterHistory::new(
                history,
                limits,
                lifespan,
                Arc::clone(&self.change_pool),
                Arc::clone(&self.payload_pool),
            )
        }

        fn alloc(&self, seq: u64, instance: InstanceHandle, ts_ns: u64) -> ChangeIndex {
            let (handle, buf) = self.payload_pool.reserve(8).expect("payload");
            buf[..8].copy_from_slice(&seq.to_le_bytes());
            let change = CacheChange::alive(
                Guid::from_bytes([1u8; 16]),
                seq,
                instance,
                Timestamp::from_nanos(ts_ns),
                Payload { handle, len: 8 },
            );
            self.change_pool.alloc(change).expect("arena slot")
        }
    }

    fn unlimited() -> ResourceLimits {
        ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");

        let idx = fx.alloc(1, instance, 10);
        history.insert(idx).expect("insert");

        assert_eq!(history.len(), 1);
        assert_eq!(history.get(1), Some(idx));
        assert_eq!(history.earliest(), Some(1));
        assert_eq!(history.latest(), Some(1));
        assert_eq!(history.samples_for_instance(instance), 1);
    }

    #[test]
    fn test_keep_last_evicts_per_instance() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepLast(2), unlimited(), Lifespan::infinite());
        let a = instance_handle_from_key(b"a");
        let b = instance_handle_from_key(b"b");

        for seq in 1..=3u64 {
            let idx = fx.alloc(seq, a, seq);
            let outcome = history.insert(idx).expect("insert");
            if seq < 3 {
                assert!(outcome.evicted.is_empty());
            } else {
                assert_eq!(outcome.evicted.len(), 1);
                assert_eq!(outcome.evicted[0].0, 1);
                history.release_change(outcome.evicted[0].1);
            }
        }
        // Other instance is untouched by instance-a evictions.
        let idx = fx.alloc(4, b, 4);
        assert!(history.insert(idx).expect("insert").evicted.is_empty());

        assert_eq!(history.samples_for_instance(a), 2);
        assert_eq!(history.samples_for_instance(b), 1);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_keep_all_would_block_on_max_samples() {
        let fx = Fixture::new();
        let limits = ResourceLimits {
            max_samples: 2,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        };
        let mut history = fx.history(History::KeepAll, limits, Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");

        history.insert(fx.alloc(1, instance, 1)).expect("insert");
        history.insert(fx.alloc(2, instance, 2)).expect("insert");

        let idx = fx.alloc(3, instance, 3);
        let err = history.insert(idx).expect_err("keep_all must refuse");
        assert!(matches!(err, Error::WouldBlock));
        // The rejected change stays allocated; give it back.
        history.release_change(idx);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_keep_all_would_block_per_instance() {
        let fx = Fixture::new();
        let limits = ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: 1,
        };
        let mut history = fx.history(History::KeepAll, limits, Lifespan::infinite());
        let a = instance_handle_from_key(b"a");
        let b = instance_handle_from_key(b"b");

        history.insert(fx.alloc(1, a, 1)).expect("insert");
        let idx = fx.alloc(2, a, 2);
        assert!(matches!(history.insert(idx), Err(Error::WouldBlock)));
        history.release_change(idx);

        // A different instance still has room.
        history.insert(fx.alloc(3, b, 3)).expect("insert");
    }

    #[test]
    fn test_max_instances_checked_on_unknown_instance_only() {
        let fx = Fixture::new();
        let limits = ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: 1,
            max_samples_per_instance: LENGTH_UNLIMITED,
        };
        let mut history = fx.history(History::KeepAll, limits, Lifespan::infinite());
        let a = instance_handle_from_key(b"a");
        let b = instance_handle_from_key(b"b");

        history.insert(fx.alloc(1, a, 1)).expect("insert");
        // Known instance: fine.
        history.insert(fx.alloc(2, a, 2)).expect("insert");
        // Unknown instance: over the limit.
        let idx = fx.alloc(3, b, 3);
        assert!(matches!(history.insert(idx), Err(Error::OutOfResources(_))));
        history.release_change(idx);
    }

    #[test]
    fn test_range_iteration_in_order() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");
        for seq in 1..=5u64 {
            history.insert(fx.alloc(seq, instance, seq)).expect("insert");
        }

        let seqs: Vec<u64> = history.range(2, 4).iter().map(|&(s, _)| s).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_remove_min_detaches_instance_entry() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");
        history.insert(fx.alloc(1, instance, 1)).expect("insert");
        history.insert(fx.alloc(2, instance, 2)).expect("insert");

        let (seq, idx) = history.remove_min().expect("remove_min");
        assert_eq!(seq, 1);
        history.release_change(idx);
        assert_eq!(history.samples_for_instance(instance), 1);
        assert_eq!(history.earliest(), Some(2));
    }

    #[test]
    fn test_deadline_bookkeeping() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let a = instance_handle_from_key(b"a");
        let b = instance_handle_from_key(b"b");

        let now = Instant::now();
        history.set_next_deadline(a, now + Duration::from_millis(200));
        history.set_next_deadline(b, now + Duration::from_millis(100));

        let (instance, when) = history.get_earliest_deadline().expect("armed");
        assert_eq!(instance, b);
        assert_eq!(when, now + Duration::from_millis(100));

        history.clear_deadline(b);
        let (instance, _) = history.get_earliest_deadline().expect("armed");
        assert_eq!(instance, a);
    }

    #[test]
    fn test_lifespan_expiry_oldest_first() {
        let fx = Fixture::new();
        let mut history = fx.history(
            History::KeepAll,
            unlimited(),
            Lifespan::new(Duration::from_nanos(100)),
        );
        let instance = instance_handle_from_key(b"a");
        history.insert(fx.alloc(1, instance, 1_000)).expect("insert");
        history.insert(fx.alloc(2, instance, 2_000)).expect("insert");

        let (seq, expiry) = history.earliest_expiry().expect("expiry");
        assert_eq!(seq, 1);
        assert_eq!(expiry, Timestamp::from_nanos(1_100));

        // Only the first sample has expired at t=1500.
        let expired = history.expire_older_than(Timestamp::from_nanos(1_500));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 1);
        for (_, idx) in expired {
            history.release_change(idx);
        }

        let expired = history.expire_older_than(Timestamp::from_nanos(10_000));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 2);
        for (_, idx) in expired {
            history.release_change(idx);
        }
        assert!(history.is_empty());
    }

    #[test]
    fn test_infinite_lifespan_never_expires() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");
        history.insert(fx.alloc(1, instance, 1)).expect("insert");

        assert!(history.earliest_expiry().is_none());
        assert!(history.expire_older_than(Timestamp::from_nanos(u64::MAX)).is_empty());
    }

    #[test]
    fn test_drain_returns_everything() {
        let fx = Fixture::new();
        let mut history = fx.history(History::KeepAll, unlimited(), Lifespan::infinite());
        let instance = instance_handle_from_key(b"a");
        for seq in 1..=3u64 {
            history.insert(fx.alloc(seq, instance, seq)).expect("insert");
        }

        let drained = history.drain();
        assert_eq!(drained.len(), 3);
        assert!(history.is_empty());
        assert_eq!(history.instance_count(), 0);
        for (_, idx) in drained {
            history.release_change(idx);
        }
        assert_eq!(fx.change_pool.len(), 0);
        assert_eq!(fx.payload_pool.reserved_bytes(), 0);
    }
}
