// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! The DataWriter: application-visible writer of one topic type.
//!
//! Enforces QoS on every mutating operation, allocates samples from the
//! participant pools, drives instance-state changes, asserts liveliness and
//! owns the per-writer timers. One mutex (the "writer mutex",
//! `WriterInner::state`) protects history, instance registry and sequence
//! assignment; reliability state uses its own synchronization so the flow
//! worker and the control path can run concurrently with `write()`.

/// Fail-fast writer construction.
pub mod builder;
/// Instance lifecycle and registry.
pub mod instances;
/// Deadline / lifespan / liveliness timers.
pub(crate) mod timers;

pub use builder::DataWriterBuilder;
pub use instances::InstanceState;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::change::{CacheChange, Payload};
use crate::core::pool::{ChangeIndex, ChangePool, PayloadPool};
use crate::core::types::{ChangeKind, Guid, InstanceHandle, Timestamp, Topic};
use crate::error::{Error, Result};
use crate::flow::{DeliveryOutcome, DeliverySink, FlowController};
use crate::history::WriterHistory;
use crate::listener::{DataWriterListener, StatusCollector, StatusMask};
use crate::listener::{
    LivelinessLostStatus, OfferedDeadlineMissedStatus, OfferedIncompatibleQosStatus,
    PublicationMatchedStatus,
};
use crate::participant::{DdsType, Locator, ParticipantContext};
use crate::persistence::{PersistedSample, PersistenceStore};
use crate::publisher::CoherentTracker;
use crate::qos::{Durability, QoS, RequestedQos};
use crate::reliability::messages::tag;
use crate::reliability::{AckNackMsg, DataMsg, GapMsg, NackFragMsg, ReaderProxy, ReliabilityEngine};

use self::instances::InstanceRegistry;
use self::timers::{LivelinessTracker, WriterTimers};

/// Scratch buffer for full-sample serialization (bounded by the largest
/// payload-pool class).
const ENCODE_BUF_LEN: usize = 262_144;
/// Scratch buffer for key serialization.
const KEY_BUF_LEN: usize = 4096;
/// Send budget for control messages (heartbeats, gaps).
const CONTROL_SEND_BUDGET: Duration = Duration::from_millis(20);

/// Discovery-supplied description of a remote reader.
#[derive(Debug, Clone)]
pub struct ReaderInfo {
    pub guid: Guid,
    pub locators: Vec<Locator>,
    pub qos: RequestedQos,
}

/// State guarded by the writer mutex.
struct WriterState {
    history: WriterHistory,
    instances: InstanceRegistry,
    /// Next sequence number to assign; assignment happens strictly under
    /// the writer mutex so enqueue order matches sequence order.
    next_seq: u64,
    last_source_timestamp: Option<Timestamp>,
}

/// Untyped writer engine shared by the typed facade, the timers and the
/// flow controller.
pub(crate) struct WriterInner {
    guid: Guid,
    topic: Topic,
    qos: QoS,
    participant: Arc<ParticipantContext>,
    controller: Arc<FlowController>,
    change_pool: Arc<ChangePool>,
    payload_pool: Arc<PayloadPool>,
    engine: ReliabilityEngine,
    state: Mutex<WriterState>,
    /// Signalled whenever history space frees up (keep_all writers block on
    /// it) and on close.
    space_cond: Condvar,
    listener: Option<Arc<dyn DataWriterListener>>,
    mask: StatusMask,
    statuses: StatusCollector,
    timers: WriterTimers,
    liveliness: LivelinessTracker,
    coherent: Option<Arc<CoherentTracker>>,
    store: Option<Arc<dyn PersistenceStore>>,
    enabled: AtomicBool,
    closed: AtomicBool,
    /// Self-reference for callbacks posted from non-Arc contexts.
    weak_self: std::sync::Weak<WriterInner>,
}

impl WriterInner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        guid: Guid,
        topic: Topic,
        qos: QoS,
        participant: Arc<ParticipantContext>,
        controller: Arc<FlowController>,
        listener: Option<Arc<dyn DataWriterListener>>,
        mask: StatusMask,
        coherent: Option<Arc<CoherentTracker>>,
        store: Option<Arc<dyn PersistenceStore>>,
    ) -> Arc<Self> {
        let change_pool = participant.change_pool();
        let payload_pool = participant.payload_pool();
        let history = WriterHistory::new(
            qos.history,
            qos.resource_limits,
            qos.lifespan,
            Arc::clone(&change_pool),
            Arc::clone(&payload_pool),
        );
        let instances = InstanceRegistry::new(qos.resource_limits.max_instances);
        let timers = WriterTimers::new(&participant.event_loop());
        let liveliness = LivelinessTracker::new(qos.liveliness);

        Arc::new_cyclic(|weak| Self {
            guid,
            topic,
            qos,
            participant,
            controller,
            change_pool,
            payload_pool,
            engine: ReliabilityEngine::default(),
            state: Mutex::new(WriterState {
                history,
                instances,
                next_seq: 1,
                last_source_timestamp: None,
            }),
            space_cond: Condvar::new(),
            listener,
            mask,
            statuses: StatusCollector::default(),
            timers,
            liveliness,
            coherent,
            store,
            enabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    pub(crate) fn guid(&self) -> Guid {
        self.guid
    }

    pub(crate) fn qos(&self) -> &QoS {
        &self.qos
    }

    pub(crate) fn topic(&self) -> &Topic {
        &self.topic
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyDeleted);
        }
        if !self.enabled.load(Ordering::Acquire) {
            return Err(Error::NotEnabled);
        }
        Ok(())
    }

    // Enable / restore -------------------------------------------------------

    /// Enable the writer. For persistent durability the backend is read in
    /// sequence order and loaded into the history first.
    pub(crate) fn enable(self: &Arc<Self>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyDeleted);
        }
        if self.enabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if self.qos.durability == Durability::Persistent {
            if let Some(store) = self.store.clone() {
                self.restore_from(&*store)?;
            }
        }

        self.arm_liveliness_timer();
        if self.qos.reliability.is_reliable() {
            self.arm_heartbeat_timer();
        }
        log::debug!("[writer {}] enabled on topic '{}'", self.guid, self.topic.name());
        Ok(())
    }

    fn restore_from(self: &Arc<Self>, store: &dyn PersistenceStore) -> Result<()> {
        let samples = store.get_range(self.guid, 1, u64::MAX)?;
        if samples.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let mut last_seq = 0;
        for sample in &samples {
            let payload = if sample.payload.is_empty() {
                None
            } else {
                let Some((handle, buf)) = self.payload_pool.reserve(sample.payload.len()) else {
                    return Err(Error::OutOfResources(
                        "payload pool exhausted during restore".to_string(),
                    ));
                };
                buf[..sample.payload.len()].copy_from_slice(&sample.payload);
                Some(Payload {
                    handle,
                    len: sample.payload.len() as u32,
                })
            };

            let change = CacheChange {
                writer_guid: self.guid,
                sequence_number: sample.sequence_number,
                instance_handle: sample.instance_handle,
                kind: sample.kind,
                source_timestamp: sample.source_timestamp,
                payload,
                fragment_size: 0,
                coherent_set: None,
                writer_info: Default::default(),
            };

            let Some(idx) = self.change_pool.alloc(change) else {
                if let Some(p) = payload {
                    self.payload_pool.release(p.handle);
                }
                return Err(Error::OutOfResources(
                    "change pool exhausted during restore".to_string(),
                ));
            };
            if let Err(e) = state.history.insert(idx) {
                // History limits cut the restore short; drop the remainder.
                log::debug!("[writer {}] restore stopped at seq {}: {}", self.guid, sample.sequence_number, e);
                state.history.release_change(idx);
                break;
            }
            if self.topic.is_keyed() && !sample.key.is_empty() {
                if let Ok(handle) =
                    state.instances.register(&sample.key, self.qos.ownership_strength)
                {
                    // Replay the lifecycle the restored marker encodes.
                    match sample.kind {
                        ChangeKind::Alive => {}
                        ChangeKind::NotAliveDisposed => {
                            let _ = state.instances.dispose(handle);
                        }
                        ChangeKind::NotAliveUnregistered => {
                            let _ = state.instances.unregister(handle);
                        }
                        ChangeKind::NotAliveDisposedUnregistered => {
                            let _ = state.instances.dispose(handle);
                            let _ = state.instances.unregister(handle);
                        }
                    }
                }
            }
            last_seq = sample.sequence_number;
            state.last_source_timestamp = Some(sample.source_timestamp);
        }
        if last_seq >= state.next_seq {
            state.next_seq = last_seq + 1;
        }
        log::debug!(
            "[writer {}] restored {} sample(s), next_seq={}",
            self.guid,
            state.history.len(),
            state.next_seq
        );
        Ok(())
    }

    // Write path -------------------------------------------------------------

    /// Produce one change (alive sample or dispose/unregister marker) and
    /// hand it to the flow controller.
    pub(crate) fn produce_change(
        self: &Arc<Self>,
        payload: Option<&[u8]>,
        key: &[u8],
        supplied: InstanceHandle,
        timestamp: Option<Timestamp>,
        kind: ChangeKind,
    ) -> Result<u64> {
        self.ensure_active()?;
        let deadline = deadline_after(self.qos.reliability.max_blocking_time);

        let mut state = self.state.lock();

        // Source timestamps are monotonic per writer. Explicit regressions
        // are rejected; auto-stamped times are clamped forward.
        let ts = match timestamp {
            Some(t) => {
                if let Some(last) = state.last_source_timestamp {
                    if t < last {
                        return Err(Error::Generic(
                            "source timestamp older than previously accepted".to_string(),
                        ));
                    }
                }
                t
            }
            None => {
                let now = Timestamp::now();
                state.last_source_timestamp.map_or(now, |last| now.max(last))
            }
        };

        // Resolve the target instance; lifecycle transitions for
        // dispose/unregister apply only after the change is safely in the
        // history.
        let instance = self.resolve_target(&mut state, key, supplied, kind)?;

        // Reserve and fill the payload slot.
        let payload_slot = match payload {
            Some(bytes) if !bytes.is_empty() => {
                let Some((handle, buf)) = self.payload_pool.reserve(bytes.len()) else {
                    return Err(Error::OutOfResources("payload pool exhausted".to_string()));
                };
                buf[..bytes.len()].copy_from_slice(bytes);
                Some(Payload {
                    handle,
                    len: bytes.len() as u32,
                })
            }
            _ => None,
        };

        // Fragmentation policy: oversized samples are sliced only on
        // asynchronous writers; synchronous ones reject them.
        let mut fragment_size = 0u32;
        if let Some(p) = payload_slot {
            let payload_max = self.payload_max();
            if p.len as usize > payload_max {
                if self.qos.publish_mode.is_asynchronous()
                    && self.controller.mode().is_asynchronous()
                {
                    fragment_size = payload_max as u32;
                } else {
                    self.payload_pool.release(p.handle);
                    return Err(Error::Generic(format!(
                        "serialized payload ({} bytes) exceeds max payload ({}) for synchronous publishing",
                        p.len, payload_max
                    )));
                }
            }
        }

        // Assemble the change. Sequence numbers are contiguous: next_seq is
        // only advanced after the insert below succeeds.
        let seq = state.next_seq;
        let mut change = CacheChange {
            writer_guid: self.guid,
            sequence_number: seq,
            instance_handle: instance,
            kind,
            source_timestamp: ts,
            payload: payload_slot,
            fragment_size,
            coherent_set: None,
            writer_info: Default::default(),
        };
        if let Some(tracker) = &self.coherent {
            change.coherent_set = tracker.current();
        }

        let Some(idx) = self.change_pool.alloc(change) else {
            if let Some(p) = payload_slot {
                self.payload_pool.release(p.handle);
            }
            return Err(Error::OutOfResources("change pool exhausted".to_string()));
        };

        // Insert; keep_all blocks until space frees up or the blocking
        // budget is spent.
        loop {
            match state.history.insert(idx) {
                Ok(outcome) => {
                    for (evicted_seq, evicted_idx) in outcome.evicted {
                        self.finish_removal(&mut state, evicted_seq, evicted_idx, deadline);
                    }
                    break;
                }
                Err(Error::WouldBlock) => {
                    if self.is_closed() {
                        state.history.release_change(idx);
                        return Err(Error::AlreadyDeleted);
                    }
                    if self.space_cond.wait_until(&mut state, deadline).timed_out() {
                        state.history.release_change(idx);
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => {
                    state.history.release_change(idx);
                    return Err(e);
                }
            }
        }

        state.next_seq = seq + 1;
        state.last_source_timestamp = Some(ts);

        // The sample is committed; apply the instance transition it carries.
        match kind {
            ChangeKind::Alive => {}
            ChangeKind::NotAliveDisposed => {
                let _ = state.instances.dispose(instance);
            }
            ChangeKind::NotAliveUnregistered => {
                let _ = state.instances.unregister(instance);
            }
            ChangeKind::NotAliveDisposedUnregistered => {
                let _ = state.instances.dispose(instance);
                let _ = state.instances.unregister(instance);
            }
        }

        // Deadline bookkeeping: a write re-arms the instance slot, a
        // dispose/unregister disarms it.
        if !self.qos.deadline.is_infinite() {
            if kind == ChangeKind::Alive {
                state
                    .history
                    .set_next_deadline(instance, Instant::now() + self.qos.deadline.period);
            } else {
                state.history.clear_deadline(instance);
            }
            self.arm_deadline_timer_locked(&state);
        }
        if !self.qos.lifespan.is_infinite() {
            self.arm_lifespan_timer_locked(&state);
        }

        // Persistent durability records the sample before it goes out.
        if self.qos.durability == Durability::Persistent {
            if let Some(store) = &self.store {
                let record = PersistedSample {
                    writer_guid: self.guid,
                    sequence_number: seq,
                    kind,
                    source_timestamp: ts,
                    instance_handle: instance,
                    key: key.to_vec(),
                    payload: payload.unwrap_or(&[]).to_vec(),
                };
                if let Err(e) = store.put(&record) {
                    log::error!("[writer {}] persistence put failed for seq {}: {}", self.guid, seq, e);
                }
            }
        }

        // Enqueue in sequence order (still under the writer mutex); sync
        // modes may deliver inline on this thread.
        let enqueue = self.controller.add_new_sample(&**self as &dyn DeliverySink, idx, deadline);
        if let Err(e) = enqueue {
            // Pure-sync delivery timed out; the sample never made it out.
            if let Some(removed_idx) = state.history.remove(seq) {
                self.engine.on_change_removed(seq);
                state.history.release_change(removed_idx);
            }
            return Err(e);
        }

        // Volatile best-effort samples that already went out can be
        // reclaimed immediately.
        self.maybe_release_delivered(&mut state, seq, deadline);
        drop(state);

        // Every successful write asserts liveliness on the writer and its
        // participant.
        self.liveliness.assert_now();
        self.participant.assert_liveliness();
        Ok(seq)
    }

    /// Validate the target instance of a mutating operation. Alive writes
    /// with a nil handle register (or revive) the instance; dispose and
    /// unregister only verify here - their transition applies after insert.
    fn resolve_target(
        &self,
        state: &mut WriterState,
        key: &[u8],
        supplied: InstanceHandle,
        kind: ChangeKind,
    ) -> Result<InstanceHandle> {
        if !self.topic.is_keyed() {
            if !supplied.is_nil() {
                return Err(Error::BadParameter(
                    "unkeyed topics take the nil instance handle".to_string(),
                ));
            }
            if kind.is_not_alive() {
                return Err(Error::IllegalOperation(
                    "dispose/unregister require a keyed topic".to_string(),
                ));
            }
            return Ok(InstanceHandle::NIL);
        }

        match kind {
            ChangeKind::Alive => {
                if supplied.is_nil() {
                    // The key fields identify or create the instance.
                    state.instances.register(key, self.qos.ownership_strength)
                } else {
                    let handle = state.instances.resolve(supplied, key)?;
                    let live = state
                        .instances
                        .state(handle)
                        .map(|s| s.accepts_writes())
                        .unwrap_or(false);
                    if !live {
                        return Err(Error::PreconditionNotMet(
                            "instance is not alive".to_string(),
                        ));
                    }
                    Ok(handle)
                }
            }
            ChangeKind::NotAliveDisposed => state.instances.resolve(supplied, key),
            ChangeKind::NotAliveUnregistered | ChangeKind::NotAliveDisposedUnregistered => {
                let handle = state.instances.resolve(supplied, key)?;
                let already_gone = state
                    .instances
                    .state(handle)
                    .map(|s| s.is_terminal())
                    .unwrap_or(true);
                if already_gone {
                    return Err(Error::PreconditionNotMet(
                        "instance already unregistered".to_string(),
                    ));
                }
                Ok(handle)
            }
        }
    }

    /// Fragmentation budget: transport datagram payload net of the data
    /// header, further capped by the controller's bytes-per-period budget.
    fn payload_max(&self) -> usize {
        let mut max = self
            .participant
            .transport()
            .max_datagram_size()
            .saturating_sub(crate::reliability::DATA_HEADER_LEN + 1);
        if let Some(budget) = self.controller.max_bytes_per_period() {
            max = max.min(budget.saturating_sub(crate::reliability::DATA_HEADER_LEN + 1));
        }
        max.max(1)
    }

    // Removal ----------------------------------------------------------------

    /// Complete removal of a change that already left the history maps:
    /// unlink from the controller, drop reliability state, delete from the
    /// persistence backend, release to the pools, reclaim the instance if
    /// terminal and drained.
    fn finish_removal(
        &self,
        state: &mut WriterState,
        seq: u64,
        idx: ChangeIndex,
        deadline: Instant,
    ) {
        self.controller.remove_change(idx, deadline);
        self.engine.on_change_removed(seq);
        if self.qos.durability == Durability::Persistent {
            if let Some(store) = &self.store {
                if let Err(e) = store.delete(self.guid, seq) {
                    log::debug!("[writer {}] persistence delete failed for seq {}: {}", self.guid, seq, e);
                }
            }
        }
        let instance = self.change_pool.with(idx, |c| c.instance_handle);
        state.history.release_change(idx);
        self.reclaim_instance(state, instance);
        // History space freed; wake keep_all writers.
        self.space_cond.notify_all();
    }

    /// Terminal instances with no pending samples are forgotten. Durability
    /// kinds served by a durability service honor the service_cleanup_delay
    /// before the state is dropped.
    fn reclaim_instance(&self, state: &mut WriterState, instance: InstanceHandle) {
        if instance.is_nil() {
            return;
        }
        if state.history.samples_for_instance(instance) != 0 {
            return;
        }
        let terminal = state
            .instances
            .state(instance)
            .map(|s| s.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return;
        }

        let delay = self.qos.durability_service.service_cleanup_delay;
        if self.qos.durability.uses_durability_service() && !delay.is_zero() {
            // Hold the state until the cleanup delay elapses, then retry on
            // the event loop.
            let weak = self.weak_self.clone();
            self.participant.event_loop().post(delay, move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.is_closed() {
                        return;
                    }
                    let mut state = inner.state.lock();
                    if state.instances.remove_terminal(instance) {
                        state.history.forget_instance(instance);
                        state.history.clear_deadline(instance);
                    }
                }
            });
            return;
        }

        if state.instances.remove_terminal(instance) {
            state.history.forget_instance(instance);
            state.history.clear_deadline(instance);
        }
    }

    /// Volatile writers drop samples as soon as every currently-matched
    /// reader has them: delivered for best-effort, acked for reliable.
    fn maybe_release_delivered(&self, state: &mut WriterState, seq: u64, deadline: Instant) {
        if self.qos.durability != Durability::Volatile {
            return;
        }
        let Some(idx) = state.history.get(seq) else {
            return;
        };
        let (sent, linked) = self
            .change_pool
            .with(idx, |c| (c.writer_info.submessages_sent > 0, c.writer_info.is_linked()));
        if linked || !sent {
            return;
        }
        let released = if self.qos.reliability.is_reliable() {
            self.engine.acked_by_all(seq)
        } else {
            true
        };
        if released {
            if let Some(idx) = state.history.remove(seq) {
                self.finish_removal(state, seq, idx, deadline);
            }
        }
    }

    /// Sweep the history for volatile samples that became acked_by_all.
    fn cleanup_acked(&self, state: &mut WriterState, deadline: Instant) {
        if self.qos.durability != Durability::Volatile || !self.qos.reliability.is_reliable() {
            return;
        }
        let candidates: Vec<u64> = state
            .history
            .range(1, u64::MAX)
            .iter()
            .map(|&(s, _)| s)
            .collect();
        for seq in candidates {
            self.maybe_release_delivered(state, seq, deadline);
        }
    }

    // Delivery (DeliverySink backend) ---------------------------------------

    /// Serialize and send one change; no writer-mutex interaction.
    fn deliver_core(&self, idx: ChangeIndex, deadline: Instant) -> DeliveryOutcome {
        let (msg_meta, payload_ref) = self.change_pool.with(idx, |c| {
            (
                DataMsg {
                    writer_guid: c.writer_guid,
                    sequence_number: c.sequence_number,
                    kind: c.kind,
                    source_timestamp: c.source_timestamp,
                    coherent_set: c.coherent_set.unwrap_or(0),
                    payload_len: c.payload.map(|p| p.len).unwrap_or(0),
                    fragment_size: c.fragment_size,
                    fragment_number: 0,
                },
                c.payload,
            )
        });

        let locators = self.engine.registry().all_locators();
        if locators.is_empty() {
            // No matched reader: trivially delivered to everyone.
            self.mark_sent(idx, 1);
            return DeliveryOutcome::Delivered;
        }

        let transport = self.participant.transport();
        let sent_ok = if msg_meta.fragment_size == 0 {
            let header = msg_meta.encode();
            let msg_tag = [tag::DATA];
            match payload_ref {
                Some(p) => {
                    let bytes = &self.payload_pool.get(p.handle)[..p.len as usize];
                    transport.send(&[&msg_tag, &header, bytes], self.guid, &locators, deadline)
                }
                None => transport.send(&[&msg_tag, &header], self.guid, &locators, deadline),
            }
        } else {
            self.send_fragments(&msg_meta, payload_ref, &locators, deadline)
        };

        if !sent_ok {
            return DeliveryOutcome::NotDelivered;
        }

        let fragments = if msg_meta.fragment_size == 0 {
            1
        } else {
            let len = u64::from(msg_meta.payload_len);
            let frag = u64::from(msg_meta.fragment_size).max(1);
            u32::try_from(len.div_ceil(frag).max(1)).unwrap_or(u32::MAX)
        };
        self.mark_sent(idx, fragments);
        self.engine
            .on_delivered(msg_meta.sequence_number, fragments);
        DeliveryOutcome::Delivered
    }

    fn send_fragments(
        &self,
        meta: &DataMsg,
        payload_ref: Option<Payload>,
        locators: &[Locator],
        deadline: Instant,
    ) -> bool {
        let Some(p) = payload_ref else {
            return false;
        };
        let transport = self.participant.transport();
        let bytes = &self.payload_pool.get(p.handle)[..p.len as usize];
        let frag_size = meta.fragment_size as usize;
        let msg_tag = [tag::DATA_FRAG];

        let mut fragment_number = 1u32;
        for chunk in bytes.chunks(frag_size.max(1)) {
            let mut header_meta = *meta;
            header_meta.fragment_number = fragment_number;
            let header = header_meta.encode();
            if !transport.send(&[&msg_tag, &header, chunk], self.guid, locators, deadline) {
                return false;
            }
            fragment_number = fragment_number.saturating_add(1);
        }
        true
    }

    fn mark_sent(&self, idx: ChangeIndex, fragments: u32) {
        self.change_pool.with_mut(idx, |c| {
            c.writer_info.submessages_sent = c.writer_info.submessages_sent.saturating_add(fragments);
        });
    }

    // Matching ---------------------------------------------------------------

    /// Discovery callback: a remote reader wants to match.
    pub(crate) fn reader_matched(self: &Arc<Self>, info: ReaderInfo) {
        match self.qos.check_offered_against(&info.qos) {
            Err(policy) => {
                log::debug!(
                    "[writer {}] reader {} rejected: incompatible {}",
                    self.guid,
                    info.guid,
                    policy.name()
                );
                let status = self.statuses.incompatible_qos(policy);
                self.notify_incompatible(status);
            }
            Ok(()) => {
                let proxy = Arc::new(ReaderProxy::new(info.guid, info.locators, info.qos));
                let wants_history = proxy.wants_history();
                self.engine.reader_matched(proxy);

                // Transient-local writers re-announce their retained history
                // so the late joiner catches up.
                if self.qos.durability >= Durability::TransientLocal && wants_history {
                    let state = self.state.lock();
                    for (_, idx) in state.history.range(1, u64::MAX) {
                        let linked = self.change_pool.with(idx, |c| c.writer_info.is_linked());
                        if !linked {
                            self.controller.add_old_sample(self.guid, idx);
                        }
                    }
                }

                let status = self.statuses.reader_matched(info.guid);
                self.notify_matched(status);
            }
        }
    }

    /// Discovery callback: a matched reader is gone.
    pub(crate) fn reader_unmatched(self: &Arc<Self>, reader: Guid) {
        if self.engine.reader_unmatched(reader).is_none() {
            return;
        }
        let status = self.statuses.reader_unmatched(reader);
        self.notify_matched(status);

        let deadline = Instant::now() + CONTROL_SEND_BUDGET;
        let mut state = self.state.lock();
        self.cleanup_acked(&mut state, deadline);
    }

    // Protocol input ---------------------------------------------------------

    /// Acknack received from a matched reader.
    pub(crate) fn handle_acknack(self: &Arc<Self>, msg: &AckNackMsg) {
        let outcome = self.engine.on_acknack(msg);
        let deadline = Instant::now() + CONTROL_SEND_BUDGET;

        let mut state = self.state.lock();
        let mut unavailable: Vec<u64> = Vec::new();
        for seq in outcome.retransmit {
            match state.history.get(seq) {
                Some(idx) => {
                    let linked = self.change_pool.with(idx, |c| c.writer_info.is_linked());
                    if !linked {
                        self.controller.add_old_sample(self.guid, idx);
                    }
                }
                // Evicted or expired: the reader gets a gap instead.
                None => unavailable.push(seq),
            }
        }
        self.cleanup_acked(&mut state, deadline);
        drop(state);

        if !unavailable.is_empty() {
            self.send_gaps(msg.reader_guid, &unavailable, deadline);
        }
    }

    /// Fragment nack received from a matched reader.
    pub(crate) fn handle_nack_frag(self: &Arc<Self>, msg: &NackFragMsg) {
        let state = self.state.lock();
        let Some(idx) = state.history.get(msg.sequence_number) else {
            return;
        };
        let fragments = self.change_pool.with(idx, |c| c.fragment_count());
        drop(state);

        if self.engine.on_nack_frag(msg, fragments) {
            let state = self.state.lock();
            if let Some(idx) = state.history.get(msg.sequence_number) {
                let linked = self.change_pool.with(idx, |c| c.writer_info.is_linked());
                if !linked {
                    self.controller.add_old_sample(self.guid, idx);
                }
            }
        }
    }

    fn send_gaps(&self, reader: Guid, missing: &[u64], deadline: Instant) {
        let Some(proxy) = self.engine.registry().get(reader) else {
            return;
        };
        let transport = self.participant.transport();
        let msg_tag = [tag::GAP];

        // Collapse the sorted missing set into contiguous runs.
        let mut run_start = missing[0];
        let mut prev = missing[0];
        let mut runs = Vec::new();
        for &seq in &missing[1..] {
            if seq != prev + 1 {
                runs.push(GapMsg::new(run_start, prev + 1));
                run_start = seq;
            }
            prev = seq;
        }
        runs.push(GapMsg::new(run_start, prev + 1));

        for gap in runs {
            let encoded = gap.encode();
            if !transport.send(&[&msg_tag, &encoded], self.guid, proxy.locators(), deadline) {
                log::debug!("[writer {}] gap send to {} failed", self.guid, reader);
                return;
            }
        }
    }

    // Acknowledgment wait ----------------------------------------------------

    pub(crate) fn wait_for_acknowledgments(&self, max_wait: Duration) -> Result<()> {
        self.ensure_active()?;
        let snapshot = {
            let state = self.state.lock();
            match state.history.latest() {
                Some(seq) => seq,
                // Nothing pending: trivially acknowledged.
                None => return Ok(()),
            }
        };
        let deadline = deadline_after(max_wait);
        if self.engine.wait_acked(snapshot, deadline) {
            let mut state = self.state.lock();
            self.cleanup_acked(&mut state, Instant::now() + CONTROL_SEND_BUDGET);
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }

    // Liveliness -------------------------------------------------------------

    pub(crate) fn assert_liveliness(self: &Arc<Self>) -> Result<()> {
        self.ensure_active()?;
        self.liveliness.assert_now();
        self.participant.assert_liveliness();
        self.emit_liveliness_assertion();
        Ok(())
    }

    /// Send the assertion to every matched reader (heartbeat with the
    /// liveliness flag).
    fn emit_liveliness_assertion(&self) {
        let locators = self.engine.registry().all_locators();
        if locators.is_empty() {
            return;
        }
        let (first, last) = {
            let state = self.state.lock();
            (
                state.history.earliest().unwrap_or(state.next_seq),
                state.next_seq.saturating_sub(1),
            )
        };
        let hb = self.engine.build_heartbeat(first, last, true);
        let encoded = hb.encode();
        let msg_tag = [tag::HEARTBEAT];
        let deadline = Instant::now() + CONTROL_SEND_BUDGET;
        if !self
            .participant
            .transport()
            .send(&[&msg_tag, &encoded], self.guid, &locators, deadline)
        {
            log::debug!("[writer {}] liveliness assertion send failed", self.guid);
        }
    }

    // Timers -----------------------------------------------------------------

    fn arm_deadline_timer_locked(self: &Arc<Self>, state: &WriterState) {
        if self.qos.deadline.is_infinite() {
            return;
        }
        match state.history.get_earliest_deadline() {
            Some((_, when)) => {
                let weak = Arc::downgrade(self);
                self.timers.deadline.restart_at(when, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_deadline_fire();
                    }
                });
            }
            None => self.timers.deadline.cancel(),
        }
    }

    fn on_deadline_fire(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let mut fired = Vec::new();
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            while let Some((instance, when)) = state.history.get_earliest_deadline() {
                if when > now {
                    break;
                }
                // The next deadline for the silent instance is one period on.
                state
                    .history
                    .set_next_deadline(instance, when + self.qos.deadline.period);
                fired.push(self.statuses.deadline_missed(instance));
            }
            self.arm_deadline_timer_locked(&state);
        }
        // Listener runs outside the writer mutex.
        for status in fired {
            self.notify_deadline(status);
        }
    }

    fn arm_lifespan_timer_locked(self: &Arc<Self>, state: &WriterState) {
        match state.history.earliest_expiry() {
            Some((_, expiry)) => {
                let now_ns = crate::core::types::current_time_ns();
                let delay = Duration::from_nanos(expiry.as_nanos().saturating_sub(now_ns));
                let weak = Arc::downgrade(self);
                self.timers.lifespan.restart(delay, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_lifespan_fire();
                    }
                });
            }
            None => self.timers.lifespan.cancel(),
        }
    }

    fn on_lifespan_fire(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let deadline = Instant::now() + CONTROL_SEND_BUDGET;
        let mut state = self.state.lock();
        let expired = state.history.expire_older_than(Timestamp::now());
        for (seq, idx) in expired {
            log::debug!("[writer {}] lifespan expired seq {}", self.guid, seq);
            self.finish_removal(&mut state, seq, idx, deadline);
        }
        // If the earliest survivor has not expired yet (it may have been
        // removed since arming), this re-arms for its actual expiry.
        self.arm_lifespan_timer_locked(&state);
    }

    fn arm_liveliness_timer(self: &Arc<Self>) {
        let Some(delay) = self.liveliness.next_check_delay() else {
            return;
        };
        let weak = Arc::downgrade(self);
        self.timers.liveliness.restart(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_liveliness_fire();
            }
        });
    }

    fn on_liveliness_fire(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        use crate::qos::LivelinessKind;
        match self.liveliness.qos().kind {
            LivelinessKind::Automatic => {
                // The service asserts on the writer's behalf.
                self.liveliness.assert_now();
                self.participant.assert_liveliness();
                self.emit_liveliness_assertion();
            }
            LivelinessKind::ManualByParticipant | LivelinessKind::ManualByTopic => {
                let participant_age = self.participant.participant_assertion_age();
                if self.liveliness.is_lost(participant_age) {
                    let status = self.statuses.liveliness_lost();
                    self.notify_liveliness_lost(status);
                    // Restart the lease so the next silent lease reports
                    // again instead of refiring immediately.
                    self.liveliness.assert_now();
                }
            }
        }
        self.arm_liveliness_timer();
    }

    fn arm_heartbeat_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.engine.heartbeat_period();
        self.timers.heartbeat.restart(period, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_heartbeat_fire();
            }
        });
    }

    fn on_heartbeat_fire(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let (first, last) = {
            let state = self.state.lock();
            (
                state.history.earliest().unwrap_or(state.next_seq),
                state.next_seq.saturating_sub(1),
            )
        };
        if last > 0 {
            let readers = self.engine.readers_needing_heartbeat();
            if !readers.is_empty() {
                let hb = self.engine.build_heartbeat(first, last, false);
                let encoded = hb.encode();
                let msg_tag = [tag::HEARTBEAT];
                let deadline = Instant::now() + CONTROL_SEND_BUDGET;
                let transport = self.participant.transport();
                for proxy in readers {
                    if transport.send(&[&msg_tag, &encoded], self.guid, proxy.locators(), deadline)
                    {
                        proxy.heartbeat_sent();
                    }
                }
            }
        }
        self.arm_heartbeat_timer();
    }

    // Listener dispatch ------------------------------------------------------

    fn notify_deadline(&self, status: OfferedDeadlineMissedStatus) {
        if self.mask.contains(StatusMask::OFFERED_DEADLINE_MISSED) {
            if let Some(listener) = &self.listener {
                listener.on_offered_deadline_missed(status);
            }
        }
    }

    fn notify_incompatible(&self, status: OfferedIncompatibleQosStatus) {
        if self.mask.contains(StatusMask::OFFERED_INCOMPATIBLE_QOS) {
            if let Some(listener) = &self.listener {
                listener.on_offered_incompatible_qos(status);
            }
        }
    }

    fn notify_liveliness_lost(&self, status: LivelinessLostStatus) {
        if self.mask.contains(StatusMask::LIVELINESS_LOST) {
            if let Some(listener) = &self.listener {
                listener.on_liveliness_lost(status);
            }
        }
    }

    fn notify_matched(&self, status: PublicationMatchedStatus) {
        if self.mask.contains(StatusMask::PUBLICATION_MATCHED) {
            if let Some(listener) = &self.listener {
                listener.on_publication_matched(status);
            }
        }
    }

    // Close ------------------------------------------------------------------

    /// Close the writer: autodispose live instances per the data-lifecycle
    /// QoS, stop timers, drain the history and release everything.
    pub(crate) fn close(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        if self.enabled.load(Ordering::Acquire)
            && self.topic.is_keyed()
            && self.qos.writer_data_lifecycle.autodispose_unregistered_instances
        {
            let handles = {
                let state = self.state.lock();
                state.instances.alive_handles()
            };
            for handle in handles {
                let key = {
                    let state = self.state.lock();
                    state.instances.get(handle).map(|e| e.key.clone())
                };
                if let Some(key) = key {
                    let _ = self.produce_change(
                        None,
                        &key,
                        handle,
                        None,
                        ChangeKind::NotAliveDisposedUnregistered,
                    );
                }
            }
        }

        self.closed.store(true, Ordering::Release);
        self.timers.cancel_all();
        // Wake anything blocked in keep_all inserts; they observe closed.
        self.space_cond.notify_all();

        let deadline = Instant::now() + Duration::from_millis(100);
        let mut state = self.state.lock();
        for (seq, idx) in state.history.drain() {
            self.controller.remove_change(idx, deadline);
            self.engine.on_change_removed(seq);
            state.history.release_change(idx);
        }
        drop(state);

        for idx in self.controller.unregister_writer(self.guid) {
            // Defensive: every queued change should have been in the history.
            let state = self.state.lock();
            state.history.release_change(idx);
            drop(state);
        }
        self.engine.registry().clear();
        log::debug!("[writer {}] closed", self.guid);
    }

    // Status reads -----------------------------------------------------------

    pub(crate) fn offered_deadline_missed_status(&self) -> OfferedDeadlineMissedStatus {
        self.statuses.read_deadline()
    }

    pub(crate) fn offered_incompatible_qos_status(&self) -> OfferedIncompatibleQosStatus {
        self.statuses.read_incompatible()
    }

    pub(crate) fn liveliness_lost_status(&self) -> LivelinessLostStatus {
        self.statuses.read_liveliness()
    }

    pub(crate) fn publication_matched_status(&self) -> PublicationMatchedStatus {
        self.statuses.read_matched()
    }

    // Introspection ----------------------------------------------------------

    pub(crate) fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub(crate) fn samples_for_instance(&self, instance: InstanceHandle) -> usize {
        self.state.lock().history.samples_for_instance(instance)
    }
}

impl DeliverySink for WriterInner {
    fn writer_guid(&self) -> Guid {
        self.guid
    }

    fn deliver_change(&self, idx: ChangeIndex, deadline: Instant) -> DeliveryOutcome {
        // Writer-mutex-free by contract; retention runs in after_delivery
        // (worker path) or in the write path (inline sync delivery).
        self.deliver_core(idx, deadline)
    }

    fn after_delivery(&self, idx: ChangeIndex) {
        // The change may already have been evicted and released.
        let Some(seq) = self.change_pool.try_with(idx, |c| c.sequence_number) else {
            return;
        };
        let deadline = Instant::now() + CONTROL_SEND_BUDGET;
        let mut state = self.state.lock();
        self.maybe_release_delivered(&mut state, seq, deadline);
    }
}

/// A typed writer publishing samples of `T` on one topic.
///
/// Dropping the writer closes it: per the data-lifecycle QoS, live
/// instances are disposed/unregistered first, then all resources cascade
/// back to the participant pools.
pub struct DataWriter<T: DdsType> {
    inner: Arc<WriterInner>,
    _marker: PhantomData<T>,
}

impl<T: DdsType> std::fmt::Debug for DataWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataWriter")
            .field("guid", &self.guid())
            .finish()
    }
}

impl<T: DdsType> DataWriter<T> {
    pub(crate) fn from_inner(inner: Arc<WriterInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn inner_weak(&self) -> std::sync::Weak<WriterInner> {
        Arc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.inner.guid()
    }

    #[must_use]
    pub fn qos(&self) -> &QoS {
        self.inner.qos()
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        self.inner.topic()
    }

    /// Enable the writer (no-op when already enabled). Builders enable by
    /// default.
    pub fn enable(&self) -> Result<()> {
        self.inner.enable()
    }

    /// Publish one sample; the instance is derived from the key fields.
    pub fn write(&self, sample: &T) -> Result<()> {
        self.write_with(sample, InstanceHandle::NIL, None)
    }

    /// Publish with an explicit source timestamp. Timestamps must be
    /// monotonically non-decreasing per writer.
    pub fn write_with_timestamp(&self, sample: &T, timestamp: Timestamp) -> Result<()> {
        self.write_with(sample, InstanceHandle::NIL, Some(timestamp))
    }

    /// Publish against a previously-registered instance handle.
    pub fn write_to_instance(&self, sample: &T, handle: InstanceHandle) -> Result<()> {
        self.write_with(sample, handle, None)
    }

    fn write_with(
        &self,
        sample: &T,
        handle: InstanceHandle,
        timestamp: Option<Timestamp>,
    ) -> Result<()> {
        let payload = encode_sample(sample)?;
        let key = self.encode_key_if_keyed(sample)?;
        self.inner
            .produce_change(Some(&payload), &key, handle, timestamp, ChangeKind::Alive)
            .map(|_| ())
    }

    /// Register the instance identified by the sample's key fields.
    /// Idempotent: a second call returns the existing handle.
    pub fn register_instance(&self, key_sample: &T) -> Result<InstanceHandle> {
        self.inner.ensure_active()?;
        if !self.inner.topic().is_keyed() {
            return Err(Error::IllegalOperation(
                "register_instance requires a keyed topic".to_string(),
            ));
        }
        let key = self.encode_key_if_keyed(key_sample)?;
        let handle = {
            let mut state = self.inner.state.lock();
            state
                .instances
                .register(&key, self.inner.qos().ownership_strength)?
        };
        self.inner.liveliness.assert_now();
        self.inner.participant.assert_liveliness();
        Ok(handle)
    }

    /// Reverse a prior register. Readers observe `not_alive_no_writers`
    /// once no writer has the instance registered.
    pub fn unregister_instance(&self, key_sample: &T, handle: InstanceHandle) -> Result<()> {
        let key = self.encode_key_if_keyed(key_sample)?;
        self.inner
            .produce_change(None, &key, handle, None, ChangeKind::NotAliveUnregistered)
            .map(|_| ())
    }

    /// Unregister with an explicit source timestamp.
    pub fn unregister_instance_with_timestamp(
        &self,
        key_sample: &T,
        handle: InstanceHandle,
        timestamp: Timestamp,
    ) -> Result<()> {
        let key = self.encode_key_if_keyed(key_sample)?;
        self.inner
            .produce_change(
                None,
                &key,
                handle,
                Some(timestamp),
                ChangeKind::NotAliveUnregistered,
            )
            .map(|_| ())
    }

    /// Mark the instance deleted; readers see `not_alive_disposed`.
    pub fn dispose(&self, key_sample: &T, handle: InstanceHandle) -> Result<()> {
        let key = self.encode_key_if_keyed(key_sample)?;
        self.inner
            .produce_change(None, &key, handle, None, ChangeKind::NotAliveDisposed)
            .map(|_| ())
    }

    /// Dispose with an explicit source timestamp.
    pub fn dispose_with_timestamp(
        &self,
        key_sample: &T,
        handle: InstanceHandle,
        timestamp: Timestamp,
    ) -> Result<()> {
        let key = self.encode_key_if_keyed(key_sample)?;
        self.inner
            .produce_change(
                None,
                &key,
                handle,
                Some(timestamp),
                ChangeKind::NotAliveDisposed,
            )
            .map(|_| ())
    }

    /// Rebuild the key fields of a registered instance.
    pub fn key_value(&self, handle: InstanceHandle) -> Result<T> {
        if handle.is_nil() {
            return Err(Error::BadParameter("nil instance handle".to_string()));
        }
        let key = {
            let state = self.inner.state.lock();
            state
                .instances
                .get(handle)
                .map(|e| e.key.clone())
                .ok_or_else(|| Error::PreconditionNotMet("unknown instance handle".to_string()))?
        };
        T::decode_key(&key)
    }

    /// Query the handle for a key sample without registering it. Returns
    /// the nil handle when the instance is unknown.
    pub fn lookup_instance(&self, key_sample: &T) -> Result<InstanceHandle> {
        if !self.inner.topic().is_keyed() {
            return Ok(InstanceHandle::NIL);
        }
        let key = self.encode_key_if_keyed(key_sample)?;
        let state = self.inner.state.lock();
        Ok(state.instances.lookup(&key))
    }

    /// Block until every matched reliable reader acknowledged everything
    /// currently pending, or `max_wait` elapses.
    pub fn wait_for_acknowledgments(&self, max_wait: Duration) -> Result<()> {
        self.inner.wait_for_acknowledgments(max_wait)
    }

    /// Manually assert liveliness (manual-by-* kinds).
    pub fn assert_liveliness(&self) -> Result<()> {
        self.inner.assert_liveliness()
    }

    // Boundary plumbing ------------------------------------------------------

    /// Discovery callback: a compatible reader appeared.
    pub fn reader_matched(&self, info: ReaderInfo) {
        self.inner.reader_matched(info);
    }

    /// Discovery callback: a matched reader disappeared.
    pub fn reader_unmatched(&self, reader: Guid) {
        self.inner.reader_unmatched(reader);
    }

    /// Reception path: acknack addressed to this writer.
    pub fn handle_acknack(&self, msg: &AckNackMsg) {
        self.inner.handle_acknack(msg);
    }

    /// Reception path: fragment nack addressed to this writer.
    pub fn handle_nack_frag(&self, msg: &NackFragMsg) {
        self.inner.handle_nack_frag(msg);
    }

    // Statuses ---------------------------------------------------------------

    pub fn offered_deadline_missed_status(&self) -> OfferedDeadlineMissedStatus {
        self.inner.offered_deadline_missed_status()
    }

    pub fn offered_incompatible_qos_status(&self) -> OfferedIncompatibleQosStatus {
        self.inner.offered_incompatible_qos_status()
    }

    pub fn liveliness_lost_status(&self) -> LivelinessLostStatus {
        self.inner.liveliness_lost_status()
    }

    pub fn publication_matched_status(&self) -> PublicationMatchedStatus {
        self.inner.publication_matched_status()
    }

    /// Pending samples in the writer history (observability/tests).
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inner.history_len()
    }

    /// Pending samples of one instance.
    #[must_use]
    pub fn samples_for_instance(&self, handle: InstanceHandle) -> usize {
        self.inner.samples_for_instance(handle)
    }

    /// Close the writer explicitly (also happens on drop).
    pub fn close(&self) {
        self.inner.close();
    }

    fn encode_key_if_keyed(&self, sample: &T) -> Result<Vec<u8>> {
        if !self.inner.topic().is_keyed() {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; KEY_BUF_LEN];
        let len = sample.encode_key(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }
}

impl<T: DdsType> Drop for DataWriter<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

fn encode_sample<T: DdsType>(sample: &T) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; ENCODE_BUF_LEN];
    let len = sample.encode(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// `now + d`, saturating for pathological (near-infinite) durations.
fn deadline_after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d)
        .unwrap_or_else(|| now + Duration::from_secs(86_400))
}
