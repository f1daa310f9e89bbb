// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Single-threaded timer service.
//!
//! The participant owns one event loop; every writer timer (deadline,
//! lifespan, liveliness, heartbeat) is a callback posted here. Callbacks run
//! one at a time on the loop thread with millisecond precision and must
//! acquire the writer's own mutex before touching writer state.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Identifier of a posted callback, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Post {
        id: TimerId,
        at: Instant,
        callback: Callback,
    },
    Cancel(TimerId),
    Shutdown,
}

/// Handle to the event-loop thread.
///
/// Dropping the handle shuts the thread down after the queue drains.
pub struct EventLoop {
    tx: Sender<Command>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawn the loop thread.
    #[must_use]
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = unbounded();
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let thread = std::thread::Builder::new()
            .name("wdds-event-loop".to_string())
            .spawn(move || run_loop(&rx))
            .expect("failed to spawn event loop thread");

        Arc::new(Self {
            tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Post `callback` to run after `delay`. Returns the id for cancellation.
    pub fn post(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        self.post_at(Instant::now() + delay, callback)
    }

    /// Post `callback` to run at `at`.
    pub fn post_at(&self, at: Instant, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.tx.send(Command::Post {
            id,
            at,
            callback: Box::new(callback),
        });
        id
    }

    /// Cancel a pending callback. A callback already running (or already
    /// fired) is unaffected; cancellation of an unknown id is a no-op.
    pub fn cancel(&self, id: TimerId) {
        let _ = self.tx.send(Command::Cancel(id));
    }

    /// Stop the loop thread. Pending callbacks that have not fired are
    /// dropped without running.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // The loop can drop its own last owner from a callback; a
            // self-join would never return.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(rx: &Receiver<Command>) {
    log::debug!("[event-loop] started");

    // Deadline-ordered queue; the id in the key disambiguates equal instants.
    let mut queue: BTreeMap<(Instant, u64), Callback> = BTreeMap::new();
    let mut deadlines: HashMap<u64, Instant> = HashMap::new();

    loop {
        // Run everything that is due.
        let now = Instant::now();
        loop {
            let due = match queue.keys().next() {
                Some(&(at, id)) if at <= now => Some((at, id)),
                _ => None,
            };
            let Some((at, id)) = due else { break };
            if let Some(callback) = queue.remove(&(at, id)) {
                deadlines.remove(&id);
                callback();
            }
        }

        let timeout = queue
            .keys()
            .next()
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(500));

        match rx.recv_timeout(timeout) {
            Ok(Command::Post { id, at, callback }) => {
                deadlines.insert(id.0, at);
                queue.insert((at, id.0), callback);
            }
            Ok(Command::Cancel(id)) => {
                if let Some(at) = deadlines.remove(&id.0) {
                    queue.remove(&(at, id.0));
                }
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    log::debug!("[event-loop] stopped ({} callbacks dropped)", queue.len());
}

/// Reset-style timer: cancel, update interval, restart.
///
/// Wraps one pending event-loop callback at a time; re-arming replaces the
/// previous posting.
pub struct ResetTimer {
    event_loop: Arc<EventLoop>,
    current: Mutex<Option<TimerId>>,
}

impl ResetTimer {
    #[must_use]
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            event_loop,
            current: Mutex::new(None),
        }
    }

    /// Cancel the pending posting (if any) and arm a new one.
    pub fn restart(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        let mut current = self.current.lock();
        if let Some(id) = current.take() {
            self.event_loop.cancel(id);
        }
        *current = Some(self.event_loop.post(delay, callback));
    }

    /// Arm for an absolute instant.
    pub fn restart_at(&self, at: Instant, callback: impl FnOnce() + Send + 'static) {
        let mut current = self.current.lock();
        if let Some(id) = current.take() {
            self.event_loop.cancel(id);
        }
        *current = Some(self.event_loop.post_at(at, callback));
    }

    /// Disarm without re-arming.
    pub fn cancel(&self) {
        if let Some(id) = self.current.lock().take() {
            self.event_loop.cancel(id);
        }
    }

    /// True while a posting is outstanding (it may have fired already).
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.current.lock().is_some()
    }
}
