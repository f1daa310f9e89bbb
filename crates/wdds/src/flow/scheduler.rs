// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Scheduling policies over the controller queues.
//!
//! Every policy keeps first-delivery ("new") and retransmit ("old") changes
//! apart. FIFO serves both in strict arrival order through one shared list;
//! the other policies serve a writer's old list before its new list within
//! each round, keeping reliability repair latency low.

use std::sync::Arc;
use std::time::Instant;

use crate::core::pool::{ChangeIndex, ChangeList, ChangePool};
use crate::core::types::Guid;

/// Policy choosing the next sample to put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    /// Strict insertion order across all writers sharing the controller.
    #[default]
    Fifo,
    /// One sample per writer per round, in registration order.
    RoundRobin,
    /// Higher transport priority first; ties serve in registration order.
    HighPriority,
    /// Each writer gets a reserved bytes-per-period share at its priority;
    /// leftover bandwidth is distributed by priority.
    PriorityWithReservation,
}

/// One schedulable sample, already unlinked from its queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scheduled {
    pub writer: Guid,
    pub idx: ChangeIndex,
    pub payload_len: usize,
    pub from_old: bool,
    /// Delivery deadline recorded at enqueue time.
    pub deadline: Instant,
}

struct WriterEntry {
    guid: Guid,
    priority: i32,
    reservation: usize,
    bytes_this_period: usize,
    new_list: ChangeList,
    old_list: ChangeList,
}

/// Queues plus pick logic; lives under the controller mutex.
pub(crate) struct Scheduler {
    policy: SchedulingPolicy,
    pool: Arc<ChangePool>,
    /// Shared arrival-order list (FIFO policy only).
    fifo: Option<ChangeList>,
    /// Tracks which queued changes came in as retransmits (FIFO policy).
    fifo_old: Vec<ChangeIndex>,
    /// Per-sample deadlines recorded at enqueue.
    deadlines: Vec<(ChangeIndex, Instant)>,
    writers: Vec<WriterEntry>,
    rr_cursor: usize,
}

impl Scheduler {
    pub(crate) fn new(policy: SchedulingPolicy, pool: Arc<ChangePool>) -> Self {
        let fifo = matches!(policy, SchedulingPolicy::Fifo).then(|| ChangeList::new(&pool));
        Self {
            policy,
            pool,
            fifo,
            fifo_old: Vec::new(),
            deadlines: Vec::new(),
            writers: Vec::new(),
            rr_cursor: 0,
        }
    }

    /// Register a writer. Priority ordering is maintained at insert so the
    /// pick loops iterate in (priority, registration) order.
    pub(crate) fn register_writer(&mut self, guid: Guid, priority: i32, reservation: usize) {
        if self.writers.iter().any(|w| w.guid == guid) {
            return;
        }
        let entry = WriterEntry {
            guid,
            priority,
            reservation,
            bytes_this_period: 0,
            new_list: ChangeList::new(&self.pool),
            old_list: ChangeList::new(&self.pool),
        };
        // Stable position: after every writer with >= priority.
        let pos = self
            .writers
            .iter()
            .position(|w| w.priority < priority)
            .unwrap_or(self.writers.len());
        self.writers.insert(pos, entry);
    }

    /// Drop a writer, unlinking anything it still had queued. Returns the
    /// orphaned change indices for the caller to release.
    pub(crate) fn unregister_writer(&mut self, guid: Guid) -> Vec<ChangeIndex> {
        let mut orphans = Vec::new();
        if let Some(fifo) = &self.fifo {
            for idx in fifo.snapshot(&self.pool) {
                if self.pool.with(idx, |c| c.writer_guid) == guid {
                    ChangeList::detach(&self.pool, idx);
                    orphans.push(idx);
                }
            }
        }
        if let Some(pos) = self.writers.iter().position(|w| w.guid == guid) {
            let entry = self.writers.remove(pos);
            while let Some(idx) = entry.old_list.pop_front(&self.pool) {
                orphans.push(idx);
            }
            while let Some(idx) = entry.new_list.pop_front(&self.pool) {
                orphans.push(idx);
            }
            if self.rr_cursor > pos {
                self.rr_cursor -= 1;
            }
        }
        for idx in &orphans {
            self.forget_meta(*idx);
        }
        orphans
    }

    pub(crate) fn add_new(&mut self, guid: Guid, idx: ChangeIndex, deadline: Instant) {
        self.deadlines.push((idx, deadline));
        if let Some(fifo) = &self.fifo {
            fifo.push_back(&self.pool, idx);
            return;
        }
        if let Some(entry) = self.writers.iter().find(|w| w.guid == guid) {
            entry.new_list.push_back(&self.pool, idx);
        } else {
            log::error!("[flow] add_new for unregistered writer {}", guid);
            self.deadlines.retain(|&(i, _)| i != idx);
        }
    }

    pub(crate) fn add_old(&mut self, guid: Guid, idx: ChangeIndex, deadline: Instant) {
        self.deadlines.push((idx, deadline));
        if let Some(fifo) = &self.fifo {
            // FIFO interleaves retransmits in strict arrival order.
            fifo.push_back(&self.pool, idx);
            self.fifo_old.push(idx);
            return;
        }
        if let Some(entry) = self.writers.iter().find(|w| w.guid == guid) {
            entry.old_list.push_back(&self.pool, idx);
        } else {
            log::error!("[flow] add_old for unregistered writer {}", guid);
            self.deadlines.retain(|&(i, _)| i != idx);
        }
    }

    /// True when any queue holds a sample.
    pub(crate) fn has_pending(&self) -> bool {
        if let Some(fifo) = &self.fifo {
            return !fifo.is_empty(&self.pool);
        }
        self.writers
            .iter()
            .any(|w| !w.old_list.is_empty(&self.pool) || !w.new_list.is_empty(&self.pool))
    }

    /// Unlink and return the next sample per policy.
    pub(crate) fn next(&mut self) -> Option<Scheduled> {
        match self.policy {
            SchedulingPolicy::Fifo => self.next_fifo(),
            SchedulingPolicy::RoundRobin => self.next_round_robin(),
            SchedulingPolicy::HighPriority => self.next_priority(false),
            SchedulingPolicy::PriorityWithReservation => self.next_priority(true),
        }
    }

    fn next_fifo(&mut self) -> Option<Scheduled> {
        let fifo = self.fifo.as_ref()?;
        let idx = fifo.pop_front(&self.pool)?;
        let from_old = self.fifo_old.iter().any(|&i| i == idx);
        self.fifo_old.retain(|&i| i != idx);
        Some(self.finish_pick(idx, from_old))
    }

    fn next_round_robin(&mut self) -> Option<Scheduled> {
        if self.writers.is_empty() {
            return None;
        }
        for step in 0..self.writers.len() {
            let slot = (self.rr_cursor + step) % self.writers.len();
            let entry = &self.writers[slot];
            let picked = entry
                .old_list
                .pop_front(&self.pool)
                .map(|idx| (idx, true))
                .or_else(|| entry.new_list.pop_front(&self.pool).map(|idx| (idx, false)));
            if let Some((idx, from_old)) = picked {
                self.rr_cursor = (slot + 1) % self.writers.len();
                return Some(self.finish_pick(idx, from_old));
            }
        }
        None
    }

    fn next_priority(&mut self, reserved_first: bool) -> Option<Scheduled> {
        if reserved_first {
            // Writers still inside their reserved share go first.
            for slot in 0..self.writers.len() {
                let entry = &self.writers[slot];
                if entry.reservation == 0 || entry.bytes_this_period >= entry.reservation {
                    continue;
                }
                if let Some(picked) = Self::pop_old_then_new(&self.pool, entry) {
                    return Some(self.finish_pick(picked.0, picked.1));
                }
            }
        }
        for slot in 0..self.writers.len() {
            let entry = &self.writers[slot];
            if let Some(picked) = Self::pop_old_then_new(&self.pool, entry) {
                return Some(self.finish_pick(picked.0, picked.1));
            }
        }
        None
    }

    fn pop_old_then_new(pool: &ChangePool, entry: &WriterEntry) -> Option<(ChangeIndex, bool)> {
        entry
            .old_list
            .pop_front(pool)
            .map(|idx| (idx, true))
            .or_else(|| entry.new_list.pop_front(pool).map(|idx| (idx, false)))
    }

    fn finish_pick(&mut self, idx: ChangeIndex, from_old: bool) -> Scheduled {
        let (writer, payload_len) = self.pool.with(idx, |c| (c.writer_guid, c.payload_len()));
        let deadline = self.take_deadline(idx);
        Scheduled {
            writer,
            idx,
            payload_len,
            from_old,
            deadline,
        }
    }

    /// Re-link a sample at the head of the queue it came from (failed
    /// delivery keeps wire order).
    pub(crate) fn requeue_front(&mut self, scheduled: &Scheduled) {
        self.deadlines.push((scheduled.idx, scheduled.deadline));
        if let Some(fifo) = &self.fifo {
            fifo.push_front(&self.pool, scheduled.idx);
            if scheduled.from_old {
                self.fifo_old.push(scheduled.idx);
            }
            return;
        }
        if let Some(entry) = self.writers.iter().find(|w| w.guid == scheduled.writer) {
            if scheduled.from_old {
                entry.old_list.push_front(&self.pool, scheduled.idx);
            } else {
                entry.new_list.push_front(&self.pool, scheduled.idx);
            }
        } else {
            // Writer unregistered mid-flight; its changes are orphaned.
            self.forget_meta(scheduled.idx);
        }
    }

    /// Unlink an arbitrary queued sample (writer-initiated removal).
    pub(crate) fn remove(&mut self, idx: ChangeIndex) -> bool {
        let was_linked = ChangeList::detach(&self.pool, idx);
        self.forget_meta(idx);
        was_linked
    }

    /// Byte accounting for reservation shares.
    pub(crate) fn charge(&mut self, guid: Guid, bytes: usize) {
        if let Some(entry) = self.writers.iter_mut().find(|w| w.guid == guid) {
            entry.bytes_this_period = entry.bytes_this_period.saturating_add(bytes);
        }
    }

    /// New budget period: reservation accounting starts over.
    pub(crate) fn reset_period(&mut self) {
        for entry in &mut self.writers {
            entry.bytes_this_period = 0;
        }
    }

    fn take_deadline(&mut self, idx: ChangeIndex) -> Instant {
        if let Some(pos) = self.deadlines.iter().position(|&(i, _)| i == idx) {
            self.deadlines.swap_remove(pos).1
        } else {
            Instant::now()
        }
    }

    fn forget_meta(&mut self, idx: ChangeIndex) {
        self.deadlines.retain(|&(i, _)| i != idx);
        self.fifo_old.retain(|&i| i != idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{CacheChange, Payload};
    use crate::core::pool::PayloadPool;
    use crate::core::types::{InstanceHandle, Timestamp};

    struct Fixture {
        pool: Arc<ChangePool>,
        payloads: Arc<PayloadPool>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: Arc::new(ChangePool::with_capacity(64)),
                payloads: Arc::new(PayloadPool::new()),
            }
        }

        fn alloc(&self, writer: Guid, seq: u64, len: usize) -> ChangeIndex {
            let (handle, _) = self.payloads.reserve(len).expect("payload");
            let change = CacheChange::alive(
                writer,
                seq,
                InstanceHandle(1),
                Timestamp::from_nanos(seq),
                Payload {
                    handle,
                    len: len as u32,
                },
            );
            self.pool.alloc(change).expect("arena slot")
        }
    }

    fn guid(id: u8) -> Guid {
        Guid::from_bytes([id; 16])
    }

    fn deadline() -> Instant {
        Instant::now() + std::time::Duration::from_secs(1)
    }

    #[test]
    fn test_fifo_strict_arrival_order_across_writers() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::Fifo, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);
        sched.register_writer(guid(2), 0, 0);

        let a1 = fx.alloc(guid(1), 1, 8);
        let b1 = fx.alloc(guid(2), 1, 8);
        let a2 = fx.alloc(guid(1), 2, 8);
        sched.add_new(guid(1), a1, deadline());
        sched.add_new(guid(2), b1, deadline());
        // Retransmit arrives last, FIFO keeps it last.
        sched.add_old(guid(1), a2, deadline());

        assert_eq!(sched.next().unwrap().idx, a1);
        assert_eq!(sched.next().unwrap().idx, b1);
        let last = sched.next().unwrap();
        assert_eq!(last.idx, a2);
        assert!(last.from_old);
        assert!(sched.next().is_none());
    }

    #[test]
    fn test_round_robin_one_per_writer() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);
        sched.register_writer(guid(2), 0, 0);

        let a1 = fx.alloc(guid(1), 1, 8);
        let a2 = fx.alloc(guid(1), 2, 8);
        let b1 = fx.alloc(guid(2), 1, 8);
        sched.add_new(guid(1), a1, deadline());
        sched.add_new(guid(1), a2, deadline());
        sched.add_new(guid(2), b1, deadline());

        let order: Vec<ChangeIndex> = std::iter::from_fn(|| sched.next().map(|s| s.idx)).collect();
        assert_eq!(order, vec![a1, b1, a2]);
    }

    #[test]
    fn test_round_robin_serves_old_before_new() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);

        let fresh = fx.alloc(guid(1), 2, 8);
        let retrans = fx.alloc(guid(1), 1, 8);
        sched.add_new(guid(1), fresh, deadline());
        sched.add_old(guid(1), retrans, deadline());

        let first = sched.next().unwrap();
        assert_eq!(first.idx, retrans);
        assert!(first.from_old);
        assert_eq!(sched.next().unwrap().idx, fresh);
    }

    #[test]
    fn test_high_priority_order_with_fifo_ties() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::HighPriority, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);
        sched.register_writer(guid(2), 10, 0);
        sched.register_writer(guid(3), 10, 0);

        let low = fx.alloc(guid(1), 1, 8);
        let hi_a = fx.alloc(guid(2), 1, 8);
        let hi_b = fx.alloc(guid(3), 1, 8);
        sched.add_new(guid(1), low, deadline());
        sched.add_new(guid(3), hi_b, deadline());
        sched.add_new(guid(2), hi_a, deadline());

        // Priority 10 first; among equals, registration order (2 before 3).
        let order: Vec<ChangeIndex> = std::iter::from_fn(|| sched.next().map(|s| s.idx)).collect();
        assert_eq!(order, vec![hi_a, hi_b, low]);
    }

    #[test]
    fn test_priority_with_reservation_serves_reserved_share_first() {
        let fx = Fixture::new();
        let mut sched =
            Scheduler::new(SchedulingPolicy::PriorityWithReservation, Arc::clone(&fx.pool));
        // Low priority but reserved share; high priority without one.
        sched.register_writer(guid(1), 0, 1000);
        sched.register_writer(guid(2), 10, 0);

        let reserved = fx.alloc(guid(1), 1, 8);
        let priority = fx.alloc(guid(2), 1, 8);
        sched.add_new(guid(1), reserved, deadline());
        sched.add_new(guid(2), priority, deadline());

        assert_eq!(sched.next().unwrap().idx, reserved);
        assert_eq!(sched.next().unwrap().idx, priority);
    }

    #[test]
    fn test_reservation_exhausted_falls_back_to_priority() {
        let fx = Fixture::new();
        let mut sched =
            Scheduler::new(SchedulingPolicy::PriorityWithReservation, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 10);
        sched.register_writer(guid(2), 10, 0);

        sched.charge(guid(1), 10); // share spent
        let low = fx.alloc(guid(1), 1, 8);
        let hi = fx.alloc(guid(2), 1, 8);
        sched.add_new(guid(1), low, deadline());
        sched.add_new(guid(2), hi, deadline());

        assert_eq!(sched.next().unwrap().idx, hi);
        assert_eq!(sched.next().unwrap().idx, low);

        sched.reset_period();
        let low2 = fx.alloc(guid(1), 2, 8);
        let hi2 = fx.alloc(guid(2), 2, 8);
        sched.add_new(guid(1), low2, deadline());
        sched.add_new(guid(2), hi2, deadline());
        assert_eq!(sched.next().unwrap().idx, low2);
    }

    #[test]
    fn test_requeue_front_preserves_wire_order() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::Fifo, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);

        let a = fx.alloc(guid(1), 1, 8);
        let b = fx.alloc(guid(1), 2, 8);
        sched.add_new(guid(1), a, deadline());
        sched.add_new(guid(1), b, deadline());

        let picked = sched.next().unwrap();
        sched.requeue_front(&picked);
        assert_eq!(sched.next().unwrap().idx, a);
        assert_eq!(sched.next().unwrap().idx, b);
    }

    #[test]
    fn test_remove_unlinks_queued_change() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);

        let a = fx.alloc(guid(1), 1, 8);
        sched.add_new(guid(1), a, deadline());
        assert!(sched.remove(a));
        assert!(!sched.remove(a));
        assert!(!sched.has_pending());
        assert!(!fx.pool.with(a, |c| c.writer_info.is_linked()));
    }

    #[test]
    fn test_unregister_returns_orphans() {
        let fx = Fixture::new();
        let mut sched = Scheduler::new(SchedulingPolicy::RoundRobin, Arc::clone(&fx.pool));
        sched.register_writer(guid(1), 0, 0);
        sched.register_writer(guid(2), 0, 0);

        let a = fx.alloc(guid(1), 1, 8);
        let b = fx.alloc(guid(2), 1, 8);
        sched.add_new(guid(1), a, deadline());
        sched.add_new(guid(2), b, deadline());

        let orphans = sched.unregister_writer(guid(1));
        assert_eq!(orphans, vec![a]);
        assert!(sched.has_pending());
        assert_eq!(sched.next().unwrap().idx, b);
    }
}
