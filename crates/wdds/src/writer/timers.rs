// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Per-writer timers, dispatched on the participant's event loop.
//!
//! All three are reset-style: cancel, update interval, restart. Their
//! callbacks observe the writer's closed flag and no-op after close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::event_loop::{EventLoop, ResetTimer};
use crate::qos::{Liveliness, LivelinessKind};

/// The deadline, lifespan, liveliness and heartbeat timers of one writer.
pub(crate) struct WriterTimers {
    pub deadline: ResetTimer,
    pub lifespan: ResetTimer,
    pub liveliness: ResetTimer,
    /// Periodic heartbeat for reliable writers (the reliability engine
    /// paces per-reader emission).
    pub heartbeat: ResetTimer,
}

impl WriterTimers {
    pub(crate) fn new(event_loop: &Arc<EventLoop>) -> Self {
        Self {
            deadline: ResetTimer::new(Arc::clone(event_loop)),
            lifespan: ResetTimer::new(Arc::clone(event_loop)),
            liveliness: ResetTimer::new(Arc::clone(event_loop)),
            heartbeat: ResetTimer::new(Arc::clone(event_loop)),
        }
    }

    pub(crate) fn cancel_all(&self) {
        self.deadline.cancel();
        self.lifespan.cancel();
        self.liveliness.cancel();
        self.heartbeat.cancel();
    }
}

/// Liveliness assertion state for one writer's cohort membership.
pub(crate) struct LivelinessTracker {
    qos: Liveliness,
    last_assertion: Mutex<Instant>,
}

impl LivelinessTracker {
    pub(crate) fn new(qos: Liveliness) -> Self {
        Self {
            qos,
            last_assertion: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn qos(&self) -> &Liveliness {
        &self.qos
    }

    /// Record an assertion (explicit call or any successful write).
    pub(crate) fn assert_now(&self) {
        *self.last_assertion.lock() = Instant::now();
    }

    pub(crate) fn assertion_age(&self) -> Duration {
        self.last_assertion.lock().elapsed()
    }

    /// Whether the lease has lapsed. `participant_age` is the age of the
    /// participant-wide assertion, which covers the manual-by-participant
    /// cohort; automatic writers are asserted by the service and never lose
    /// liveliness locally.
    pub(crate) fn is_lost(&self, participant_age: Duration) -> bool {
        if self.qos.is_infinite() {
            return false;
        }
        let age = match self.qos.kind {
            LivelinessKind::Automatic => return false,
            LivelinessKind::ManualByParticipant => self.assertion_age().min(participant_age),
            LivelinessKind::ManualByTopic => self.assertion_age(),
        };
        age > self.qos.lease_duration
    }

    /// Delay until the timer should look again: the announcement period for
    /// automatic assertion, the remaining lease otherwise.
    pub(crate) fn next_check_delay(&self) -> Option<Duration> {
        if !self.qos.needs_timer() {
            return None;
        }
        match self.qos.kind {
            LivelinessKind::Automatic => Some(self.qos.announcement_period),
            LivelinessKind::ManualByParticipant | LivelinessKind::ManualByTopic => {
                let remaining = self
                    .qos
                    .lease_duration
                    .saturating_sub(self.assertion_age());
                Some(remaining.max(Duration::from_millis(1)))
            }
        }
    }
}
