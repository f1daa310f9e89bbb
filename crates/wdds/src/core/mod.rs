// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Core primitives of the publication path: identity types, cache changes,
//! pre-allocated pools and the participant event loop.

/// Cache change and its intrusive scheduling state.
pub mod change;
/// Single-threaded timer service and reset-style timers.
pub mod event_loop;
/// Change arena, payload slabs and intrusive change lists.
pub mod pool;
/// GUIDs, handles, timestamps, topics.
pub mod types;

pub use change::{CacheChange, Payload, WriterInfo};
pub use event_loop::{EventLoop, ResetTimer, TimerId};
pub use pool::{ChangeIndex, ChangeList, ChangePool, PayloadHandle, PayloadPool};
pub use types::{
    current_time_ns, instance_handle_from_key, ChangeKind, EntityId, Guid, GuidPrefix,
    InstanceHandle, Timestamp, Topic, TopicKind, GUID_PREFIX_LEN,
};
