// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Writer-side reliability engine.
//!
//! Keeps the matched-reader registry, drives the heartbeat/acknack protocol
//! state and answers the two questions the rest of the writer needs: which
//! sequences must be retransmitted, and when a change is acknowledged by
//! every matched reliable reader (`acked_by_all`).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::types::Guid;

use super::messages::{AckNackMsg, HeartbeatMsg, NackFragMsg};
use super::proxy::ReaderProxy;
use super::registry::MatchedReaderRegistry;

/// Default heartbeat period, matching the common RTPS 100 ms recommendation.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);

/// Outcome of processing one acknack.
#[derive(Debug, Default)]
pub struct AckNackOutcome {
    /// Sequences to requeue with retransmit priority, ascending.
    pub retransmit: Vec<u64>,
}

/// Reliability protocol state for one writer.
pub struct ReliabilityEngine {
    registry: MatchedReaderRegistry,
    heartbeat_count: AtomicU32,
    heartbeat_period: Duration,
    ack_lock: Mutex<u64>,
    ack_cond: Condvar,
}

impl ReliabilityEngine {
    #[must_use]
    pub fn new(heartbeat_period: Duration) -> Self {
        Self {
            registry: MatchedReaderRegistry::new(),
            heartbeat_count: AtomicU32::new(1),
            heartbeat_period,
            ack_lock: Mutex::new(0),
            ack_cond: Condvar::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &MatchedReaderRegistry {
        &self.registry
    }

    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_period
    }

    // Matching ---------------------------------------------------------------

    /// Add a compatible reader. Un-matching discards all its protocol state.
    pub fn reader_matched(&self, proxy: Arc<ReaderProxy>) {
        log::debug!("[reliability] matched reader {}", proxy.guid());
        self.registry.add(proxy);
    }

    pub fn reader_unmatched(&self, reader: Guid) -> Option<Arc<ReaderProxy>> {
        let removed = self.registry.remove(reader);
        if removed.is_some() {
            log::debug!("[reliability] unmatched reader {}", reader);
            // A blocked wait_for_acknowledgments may now be satisfied.
            self.signal_ack_change();
        }
        removed
    }

    // Delivery bookkeeping ---------------------------------------------------

    /// A change was handed to the transport; record per-reader sent state.
    pub fn on_delivered(&self, seq: u64, fragment_count: u32) {
        for proxy in self.registry.all() {
            proxy.record_sent(seq, fragment_count);
        }
    }

    /// A change left the history (eviction, lifespan, close). Returns how
    /// many reliable readers observe it as lost.
    pub fn on_change_removed(&self, seq: u64) -> usize {
        let mut lost = 0;
        for proxy in self.registry.reliable() {
            if proxy.forget_change(seq) {
                lost += 1;
            }
        }
        if lost > 0 {
            log::debug!("[reliability] seq {} lost for {} reader(s)", seq, lost);
        }
        self.signal_ack_change();
        lost
    }

    // Protocol input ---------------------------------------------------------

    /// Process an acknack from a matched reader.
    pub fn on_acknack(&self, msg: &AckNackMsg) -> AckNackOutcome {
        let Some(proxy) = self.registry.get(msg.reader_guid) else {
            log::debug!("[reliability] acknack from unmatched reader {}", msg.reader_guid);
            return AckNackOutcome::default();
        };

        let retransmit = proxy.on_acknack(msg.acked_base, &msg.nacked);
        self.signal_ack_change();
        AckNackOutcome { retransmit }
    }

    /// Process a fragment nack. Returns true when the sequence needs
    /// requeueing.
    pub fn on_nack_frag(&self, msg: &NackFragMsg, total_fragments: u32) -> bool {
        let Some(proxy) = self.registry.get(msg.reader_guid) else {
            return false;
        };
        proxy.on_nack_frag(msg.sequence_number, &msg.missing, total_fragments)
    }

    // Heartbeats -------------------------------------------------------------

    /// Build the next heartbeat announcing `[first, last]`.
    pub fn build_heartbeat(&self, first_seq: u64, last_seq: u64, liveliness: bool) -> HeartbeatMsg {
        let count = self.heartbeat_count.fetch_add(1, Ordering::Relaxed);
        let mut hb = HeartbeatMsg::new(first_seq, last_seq, count);
        hb.liveliness = liveliness;
        hb
    }

    /// Readers due for a periodic heartbeat.
    #[must_use]
    pub fn readers_needing_heartbeat(&self) -> Vec<Arc<ReaderProxy>> {
        self.registry
            .reliable()
            .into_iter()
            .filter(|p| p.needs_heartbeat(self.heartbeat_period))
            .collect()
    }

    // Acknowledgment queries -------------------------------------------------

    /// True when every matched reliable reader acked `seq`.
    #[must_use]
    pub fn acked_by_all(&self, seq: u64) -> bool {
        self.registry.acked_by_all(seq)
    }

    /// Block until every matched reliable reader acked `snapshot_seq` or the
    /// deadline passes. Returns whether the acknowledgment condition holds.
    pub fn wait_acked(&self, snapshot_seq: u64, deadline: Instant) -> bool {
        let mut generation = self.ack_lock.lock();
        loop {
            if self.registry.acked_by_all(snapshot_seq) {
                return true;
            }
            if self
                .ack_cond
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                return self.registry.acked_by_all(snapshot_seq);
            }
        }
    }

    fn signal_ack_change(&self) {
        let mut generation = self.ack_lock.lock();
        *generation = generation.wrapping_add(1);
        self.ack_cond.notify_all();
    }
}

impl Default for ReliabilityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_PERIOD)
    }
}
