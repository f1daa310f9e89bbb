// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Per-matched-reader state held by the writer.
//!
//! Tracks what the remote reader has been sent and has acknowledged, which
//! fragments are still outstanding, and when it was last heard from.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::types::Guid;
use crate::participant::Locator;
use crate::qos::{Durability, ReliabilityKind, RequestedQos};

/// Outstanding-fragment bitmap for one fragmented sequence.
#[derive(Debug, Clone)]
pub struct FragmentState {
    total: u32,
    pending: BTreeSet<u32>,
}

impl FragmentState {
    /// All fragments start pending.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            pending: (1..=total).collect(),
        }
    }

    /// Acknowledge one fragment (1-based).
    pub fn ack_fragment(&mut self, fragment: u32) {
        self.pending.remove(&fragment);
    }

    /// Re-mark fragments as pending from a NACK_FRAG.
    pub fn nack_fragments(&mut self, fragments: &[u32]) {
        for &f in fragments {
            if f >= 1 && f <= self.total {
                self.pending.insert(f);
            }
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<u32> {
        self.pending.iter().copied().collect()
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }
}

/// Writer-side state for one discovered, QoS-compatible reader.
pub struct ReaderProxy {
    guid: Guid,
    locators: Vec<Locator>,
    requested: RequestedQos,
    /// Highest sequence delivered to this reader.
    highest_sent: AtomicU64,
    /// Highest sequence the reader acknowledged (cumulative).
    highest_acked: AtomicU64,
    /// Sequences the reader nacked, awaiting retransmission.
    requested_changes: Mutex<BTreeSet<u64>>,
    /// Unacked fragment bitmaps per fragmented sequence.
    fragments: Mutex<BTreeMap<u64, FragmentState>>,
    /// Last heartbeat sent to this reader.
    last_heartbeat: Mutex<Instant>,
    /// Last acknack or other traffic from this reader (liveliness of the
    /// proxy itself).
    last_seen: Mutex<Instant>,
}

impl ReaderProxy {
    #[must_use]
    pub fn new(guid: Guid, locators: Vec<Locator>, requested: RequestedQos) -> Self {
        let now = Instant::now();
        Self {
            guid,
            locators,
            requested,
            highest_sent: AtomicU64::new(0),
            highest_acked: AtomicU64::new(0),
            requested_changes: Mutex::new(BTreeSet::new()),
            fragments: Mutex::new(BTreeMap::new()),
            last_heartbeat: Mutex::new(now),
            last_seen: Mutex::new(now),
        }
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    #[must_use]
    pub fn requested_qos(&self) -> &RequestedQos {
        &self.requested
    }

    /// Only reliable readers gate history removal and acknowledgments.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.requested.reliability == ReliabilityKind::Reliable
    }

    /// True for readers that want retained history on match.
    #[must_use]
    pub fn wants_history(&self) -> bool {
        self.requested.durability >= Durability::TransientLocal
    }

    /// Record a delivery of `seq` (and its fragment count when sliced).
    pub fn record_sent(&self, seq: u64, fragment_count: u32) {
        self.highest_sent.fetch_max(seq, Ordering::AcqRel);
        if fragment_count > 1 {
            self.fragments
                .lock()
                .entry(seq)
                .or_insert_with(|| FragmentState::new(fragment_count));
        }
        self.requested_changes.lock().remove(&seq);
    }

    /// Process an acknack. Returns the sequences to requeue for
    /// retransmission (the newly nacked set).
    pub fn on_acknack(&self, acked_base: u64, nacked: &[u64]) -> Vec<u64> {
        *self.last_seen.lock() = Instant::now();
        self.highest_acked
            .fetch_max(acked_base.saturating_sub(1), Ordering::AcqRel);

        let acked = acked_base.saturating_sub(1);
        let mut fragments = self.fragments.lock();
        fragments.retain(|&seq, _| seq > acked);
        drop(fragments);

        let mut requested = self.requested_changes.lock();
        let mut fresh = Vec::new();
        for &seq in nacked {
            if seq > acked && requested.insert(seq) {
                fresh.push(seq);
            }
        }
        fresh
    }

    /// Process a fragment nack for one sequence. Returns true when the
    /// sequence needs requeueing.
    pub fn on_nack_frag(&self, seq: u64, missing: &[u32], total_fragments: u32) -> bool {
        *self.last_seen.lock() = Instant::now();
        if seq <= self.highest_acked.load(Ordering::Acquire) {
            return false;
        }
        let mut fragments = self.fragments.lock();
        let state = fragments
            .entry(seq)
            .or_insert_with(|| FragmentState::new(total_fragments));
        state.nack_fragments(missing);
        !state.is_complete()
    }

    /// Cumulative acknowledgment check.
    #[must_use]
    pub fn has_acked(&self, seq: u64) -> bool {
        self.highest_acked.load(Ordering::Acquire) >= seq
    }

    #[must_use]
    pub fn highest_acked(&self) -> u64 {
        self.highest_acked.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn highest_sent(&self) -> u64 {
        self.highest_sent.load(Ordering::Acquire)
    }

    /// Sequences this reader is still owed (retransmit queue content).
    #[must_use]
    pub fn requested_changes(&self) -> Vec<u64> {
        self.requested_changes.lock().iter().copied().collect()
    }

    /// Drop retransmit/fragment state for an evicted sequence. Returns true
    /// when the reader had not acked it (it observes the sample as lost).
    pub fn forget_change(&self, seq: u64) -> bool {
        self.requested_changes.lock().remove(&seq);
        self.fragments.lock().remove(&seq);
        !self.has_acked(seq)
    }

    /// Heartbeat pacing.
    #[must_use]
    pub fn needs_heartbeat(&self, period: Duration) -> bool {
        self.last_heartbeat.lock().elapsed() >= period
    }

    pub fn heartbeat_sent(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since this reader was last heard from.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}
