// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Reliability/acknowledgment engine.
//!
//! Per-matched-reader proxies track sent and acknowledged sequences; the
//! engine turns acknacks into retransmit requests, paces heartbeats and
//! gates history removal on `acked_by_all`.

/// Engine: protocol state and acknowledgment queries.
pub mod engine;
/// Wire shapes for DATA/HEARTBEAT/GAP/ACKNACK/NACK_FRAG.
pub mod messages;
/// Per-reader proxy state.
pub mod proxy;
/// Concurrent matched-reader registry.
pub mod registry;

pub use engine::{AckNackOutcome, ReliabilityEngine, DEFAULT_HEARTBEAT_PERIOD};
pub use messages::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg, NackFragMsg, DATA_HEADER_LEN};
pub use proxy::{FragmentState, ReaderProxy};
pub use registry::MatchedReaderRegistry;
