// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! The flow controller and its worker thread.
//!
//! Lock discipline: writers call in while holding their own mutex (the
//! documented order is Publisher -> Writer -> FlowController -> Pools). The
//! worker inverts that by unlinking a sample *before* delivering it, keeps
//! `deliver_change` writer-mutex-free (retention runs in `after_delivery`
//! once the in-delivery marker is cleared), and removers raise
//! `writers_interested_in_remove` so the worker yields between samples.
//!
//! A sample sits in at most one controller queue at a time; its intrusive
//! links are nil exactly when it is unlinked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::pool::{ChangeIndex, ChangePool};
use crate::core::types::Guid;
use crate::error::{Error, Result};
use crate::reliability::DATA_HEADER_LEN;

use super::budget::PeriodBudget;
use super::scheduler::{Scheduler, SchedulingPolicy};
use super::{DeliveryOutcome, DeliverySink, FlowMode};

/// Pause before retrying after the transport refused a sample.
const RETRY_BACKOFF: Duration = Duration::from_millis(5);
/// Idle wait when no samples are queued (re-checks the running flag).
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Send budget granted to worker deliveries whose enqueue deadline passed.
const LATE_DELIVERY_GRACE: Duration = Duration::from_millis(10);

/// Configuration of one named controller.
#[derive(Debug, Clone)]
pub struct FlowControllerConfig {
    pub name: String,
    pub mode: FlowMode,
    pub policy: SchedulingPolicy,
    /// Bytes-per-period budget; required for `LimitedAsync`.
    pub max_bytes_per_period: Option<usize>,
    pub period: Duration,
}

impl Default for FlowControllerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            mode: FlowMode::Sync,
            policy: SchedulingPolicy::Fifo,
            max_bytes_per_period: None,
            period: Duration::from_millis(100),
        }
    }
}

impl FlowControllerConfig {
    #[must_use]
    pub fn pure_sync() -> Self {
        Self {
            name: "pure-sync".to_string(),
            mode: FlowMode::PureSync,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn async_with(policy: SchedulingPolicy) -> Self {
        Self {
            name: "async".to_string(),
            mode: FlowMode::Async,
            policy,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn limited_async(
        policy: SchedulingPolicy,
        max_bytes_per_period: usize,
        period: Duration,
    ) -> Self {
        Self {
            name: "limited-async".to_string(),
            mode: FlowMode::LimitedAsync,
            policy,
            max_bytes_per_period: Some(max_bytes_per_period),
            period,
        }
    }
}

struct ControllerState {
    sched: Scheduler,
    sinks: HashMap<[u8; 16], Arc<dyn DeliverySink>>,
    budget: Option<PeriodBudget>,
    /// Sample a worker is delivering right now; removers of that exact
    /// sample wait for it.
    current_delivery: Option<ChangeIndex>,
    /// Budget exhausted; the worker parks until the period rolls.
    force_wait: bool,
}

/// Schedules queued changes onto the transport.
pub struct FlowController {
    name: String,
    mode: FlowMode,
    state: Mutex<ControllerState>,
    work_cond: Condvar,
    remove_cond: Condvar,
    writers_interested_in_remove: AtomicU32,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlowController {
    /// Build a controller and start its worker (unless pure-sync).
    ///
    /// # Errors
    ///
    /// `InconsistentPolicy` when `LimitedAsync` lacks a byte budget.
    pub fn new(config: FlowControllerConfig, pool: Arc<ChangePool>) -> Result<Arc<Self>> {
        let budget = match (config.mode, config.max_bytes_per_period) {
            (FlowMode::LimitedAsync, Some(max)) => Some(PeriodBudget::new(max, config.period)),
            (FlowMode::LimitedAsync, None) => {
                return Err(Error::InconsistentPolicy(
                    "LimitedAsync controller requires max_bytes_per_period".to_string(),
                ));
            }
            _ => None,
        };

        let controller = Arc::new(Self {
            name: config.name.clone(),
            mode: config.mode,
            state: Mutex::new(ControllerState {
                sched: Scheduler::new(config.policy, pool),
                sinks: HashMap::new(),
                budget,
                current_delivery: None,
                force_wait: false,
            }),
            work_cond: Condvar::new(),
            remove_cond: Condvar::new(),
            writers_interested_in_remove: AtomicU32::new(0),
            running: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        });

        if config.mode.has_worker() {
            // The worker holds only a weak reference: the controller must be
            // droppable (join-on-drop) while its own thread still runs.
            let weak = Arc::downgrade(&controller);
            let name = config.name.clone();
            #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
            let handle = std::thread::Builder::new()
                .name(format!("wdds-flow-{}", config.name))
                .spawn(move || {
                    log::debug!("[flow-{}] worker started", name);
                    loop {
                        let Some(controller) = weak.upgrade() else {
                            break;
                        };
                        if !controller.run_cycle() {
                            break;
                        }
                    }
                    log::debug!("[flow-{}] worker stopped", name);
                })
                .expect("failed to spawn flow controller worker");
            *controller.worker.lock() = Some(handle);
        }

        Ok(controller)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    // Writer registration ----------------------------------------------------

    /// Register a writer's delivery sink with its scheduling parameters.
    pub fn register_writer(
        &self,
        sink: Arc<dyn DeliverySink>,
        priority: i32,
        reserved_bytes_per_period: usize,
    ) {
        let mut state = self.state.lock();
        let guid = sink.writer_guid();
        state
            .sched
            .register_writer(guid, priority, reserved_bytes_per_period);
        state.sinks.insert(guid.to_bytes(), sink);
        log::debug!("[flow-{}] registered writer {}", self.name, guid);
    }

    /// Remove a writer; any changes it still had queued are unlinked and
    /// returned so the caller can release them.
    pub fn unregister_writer(&self, writer: Guid) -> Vec<ChangeIndex> {
        let mut state = self.state.lock();
        state.sinks.remove(&writer.to_bytes());
        let orphans = state.sched.unregister_writer(writer);
        log::debug!(
            "[flow-{}] unregistered writer {} ({} queued change(s) dropped)",
            self.name,
            writer,
            orphans.len()
        );
        orphans
    }

    // Enqueue contract -------------------------------------------------------

    /// Hand a freshly written sample to the controller.
    ///
    /// Called with the writer mutex held so queue order matches sequence
    /// order. Sync modes attempt delivery on the caller thread; pure-sync
    /// blocks until the transport accepted the sample or `deadline` passes.
    pub fn add_new_sample(
        &self,
        sink: &dyn DeliverySink,
        idx: ChangeIndex,
        deadline: Instant,
    ) -> Result<()> {
        match self.mode {
            FlowMode::PureSync => loop {
                match sink.deliver_change(idx, deadline) {
                    DeliveryOutcome::Delivered => return Ok(()),
                    DeliveryOutcome::NotDelivered | DeliveryOutcome::ExceededLimit => {
                        if Instant::now() >= deadline {
                            return Err(Error::Timeout);
                        }
                        std::thread::sleep(RETRY_BACKOFF);
                    }
                }
            },
            FlowMode::Sync => {
                if sink.deliver_change(idx, deadline) == DeliveryOutcome::Delivered {
                    return Ok(());
                }
                self.enqueue_new(sink.writer_guid(), idx, deadline)
            }
            FlowMode::Async | FlowMode::LimitedAsync => {
                self.enqueue_new(sink.writer_guid(), idx, deadline)
            }
        }
    }

    fn enqueue_new(&self, writer: Guid, idx: ChangeIndex, deadline: Instant) -> Result<()> {
        let mut state = self.state.lock();
        state.sched.add_new(writer, idx, deadline);
        drop(state);
        self.work_cond.notify_one();
        Ok(())
    }

    /// Re-queue a sample for retransmission; lands in the "old" list, which
    /// non-FIFO schedulers serve before new samples.
    pub fn add_old_sample(&self, writer: Guid, idx: ChangeIndex) {
        debug_assert!(
            self.mode.has_worker(),
            "retransmits need a worker; pure-sync is best-effort only"
        );
        let deadline = Instant::now() + LATE_DELIVERY_GRACE;
        let mut state = self.state.lock();
        state.sched.add_old(writer, idx, deadline);
        drop(state);
        self.work_cond.notify_one();
    }

    // Removal contract -------------------------------------------------------

    /// Unlink a sample from whichever queue holds it. If a worker is mid
    /// delivery of that exact sample, block until the delivery finishes -
    /// only then is the caller free to release the change. The delivery
    /// itself is bounded by its transport deadline, so the wait terminates.
    /// `deadline` bounds nothing here; it is threaded through for the
    /// removal paths that reuse it for follow-up work.
    pub fn remove_change(&self, idx: ChangeIndex, deadline: Instant) -> bool {
        let _ = deadline;
        self.writers_interested_in_remove
            .fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        while state.current_delivery == Some(idx) {
            self.remove_cond.wait(&mut state);
        }
        let removed = state.sched.remove(idx);
        drop(state);
        self.writers_interested_in_remove
            .fetch_sub(1, Ordering::AcqRel);
        removed
    }

    // Worker -----------------------------------------------------------------

    /// One park-and-deliver cycle. Returns false once the controller shuts
    /// down.
    fn run_cycle(&self) -> bool {
        {
            let mut state = self.state.lock();

            // Park until there is schedulable work and no forced budget wait.
            while self.running.load(Ordering::Acquire)
                && (!state.sched.has_pending() || state.force_wait)
            {
                let wait = if state.force_wait {
                    state
                        .budget
                        .as_ref()
                        .map(|b| b.time_to_next_period())
                        .unwrap_or(IDLE_WAIT)
                        .max(Duration::from_millis(1))
                } else {
                    IDLE_WAIT
                };
                let _ = self.work_cond.wait_for(&mut state, wait);
                if state.force_wait {
                    let rolled = state
                        .budget
                        .as_ref()
                        .map(|b| b.time_to_next_period() == Duration::ZERO)
                        .unwrap_or(true);
                    if rolled {
                        state.force_wait = false;
                        state.sched.reset_period();
                    }
                }
            }
            if !self.running.load(Ordering::Acquire) {
                return false;
            }

            // Deliver until the queues drain, the budget runs out, or a
            // remover needs the mutex.
            loop {
                if !self.running.load(Ordering::Acquire) || state.force_wait {
                    break;
                }
                let Some(scheduled) = state.sched.next() else {
                    break;
                };

                let wire_len = scheduled.payload_len + DATA_HEADER_LEN;
                if let Some(budget) = state.budget.as_mut() {
                    if !budget.try_charge(wire_len) {
                        state.sched.requeue_front(&scheduled);
                        state.force_wait = true;
                        break;
                    }
                }

                let Some(sink) = state.sinks.get(&scheduled.writer.to_bytes()).cloned() else {
                    // Writer vanished between enqueue and pick; the change
                    // was already unlinked, let unregister's caller own it.
                    log::debug!(
                        "[flow-{}] dropping change of unregistered writer {}",
                        self.name,
                        scheduled.writer
                    );
                    continue;
                };

                state.current_delivery = Some(scheduled.idx);
                drop(state);

                let deadline = scheduled.deadline.max(Instant::now() + LATE_DELIVERY_GRACE);
                let outcome = sink.deliver_change(scheduled.idx, deadline);

                state = self.state.lock();
                state.current_delivery = None;
                self.remove_cond.notify_all();

                match outcome {
                    DeliveryOutcome::Delivered => {
                        state.sched.charge(scheduled.writer, wire_len);
                        // Retention needs the writer mutex; run it with no
                        // controller state held.
                        drop(state);
                        sink.after_delivery(scheduled.idx);
                        state = self.state.lock();
                    }
                    DeliveryOutcome::NotDelivered => {
                        state.sched.requeue_front(&scheduled);
                        // Give the transport room to drain.
                        let _ = self.work_cond.wait_for(&mut state, RETRY_BACKOFF);
                        break;
                    }
                    DeliveryOutcome::ExceededLimit => {
                        state.sched.requeue_front(&scheduled);
                        state.force_wait = true;
                        break;
                    }
                }

                if self.writers_interested_in_remove.load(Ordering::Acquire) > 0 {
                    break;
                }
            }
        }
        self.running.load(Ordering::Acquire)
    }

    /// Stop the worker and join it.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.work_cond.notify_all();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // The last reference can be dropped from the worker's own cycle;
            // a self-join would never return.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Queued samples across all writers (diagnostics).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.state.lock().sched.has_pending()
    }

    /// Byte budget per period, if this controller is limited. Feeds the
    /// writers' fragmentation budget.
    #[must_use]
    pub fn max_bytes_per_period(&self) -> Option<usize> {
        self.state.lock().budget.as_ref().map(|b| b.max_bytes_per_period())
    }
}

impl Drop for FlowController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
