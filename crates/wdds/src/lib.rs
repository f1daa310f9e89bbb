// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! # wdds - writer-side DDS publication engine
//!
//! A pure Rust implementation of the writer-side publication path of a
//! topic-based publish/subscribe middleware in the OMG DDS/RTPS tradition:
//! the DataWriter state machine, its keyed sample history, the
//! reliability/acknowledgment engine, flow-controlled scheduling onto the
//! transport, and the deadline/lifespan/liveliness timers.
//!
//! Participant bootstrap, datagram transport, endpoint discovery and the
//! reader side are external collaborators; their contracts live in
//! [`participant`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use wdds::{
//!     DataWriterBuilder, DdsType, Guid, Locator, ParticipantContext, QoS, Result, TopicKind,
//!     TransportSink,
//! };
//!
//! struct Temperature {
//!     value: f32,
//! }
//!
//! impl DdsType for Temperature {
//!     fn type_name() -> &'static str {
//!         "Temperature"
//!     }
//!     fn encode(&self, buf: &mut [u8]) -> Result<usize> {
//!         buf[..4].copy_from_slice(&self.value.to_le_bytes());
//!         Ok(4)
//!     }
//! }
//!
//! struct UdpSink; // the surrounding participant provides the real one
//! impl TransportSink for UdpSink {
//!     fn send(&self, _: &[&[u8]], _: Guid, _: &[Locator], _: Instant) -> bool {
//!         true
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let participant = ParticipantContext::new([0u8; 12], Arc::new(UdpSink));
//!     let writer = DataWriterBuilder::<Temperature>::new(
//!         participant,
//!         "sensors/temperature",
//!         TopicKind::Unkeyed,
//!     )
//!     .qos(QoS::reliable())
//!     .build()?;
//!
//!     writer.write(&Temperature { value: 23.5 })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |        Publisher -> DataWriter (write / register / dispose)        |
//! +--------------------------------------------------------------------+
//! |                          Writer Core                               |
//! |  WriterHistory | Instance Lifecycle | QoS Enforcement | Timers     |
//! +--------------------------------------------------------------------+
//! |                       Reliability Layer                            |
//! |  ReaderProxy registry | Heartbeat/Acknack | acked_by_all gating    |
//! +--------------------------------------------------------------------+
//! |                         Flow Control                               |
//! |  FIFO / RoundRobin / Priority schedulers | byte budgets | worker   |
//! +--------------------------------------------------------------------+
//! |                    Participant Boundary                            |
//! |  TransportSink | event loop | pools | discovery callbacks          |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DataWriter`] | Publishes typed, keyed samples on one topic |
//! | [`Publisher`] | Groups writers; coherent-change boundaries |
//! | [`QoS`] | Writer QoS profile (reliability, history, deadline, ...) |
//! | [`FlowController`] | Schedules samples onto the transport |
//! | [`ParticipantContext`] | Identity, event loop and pools boundary |

/// Core primitives: identity types, cache changes, pools, event loop.
pub mod core;
/// Error surface of the publication API.
pub mod error;
/// Flow control: scheduling samples onto the transport.
pub mod flow;
/// Writer-side sample history.
pub mod history;
/// Writer listener trait and status structs.
pub mod listener;
/// Participant boundary contracts (transport, types, glue).
pub mod participant;
/// Persistence boundary for PERSISTENT durability.
pub mod persistence;
/// Publisher entity and coherent change sets.
pub mod publisher;
/// Quality-of-Service policies.
pub mod qos;
/// Reliability/acknowledgment engine.
pub mod reliability;
/// The DataWriter and its building blocks.
pub mod writer;

pub use crate::core::{
    ChangeKind, Guid, GuidPrefix, InstanceHandle, Timestamp, Topic, TopicKind,
};
pub use error::{Error, Result};
pub use flow::{FlowController, FlowControllerConfig, FlowMode, SchedulingPolicy};
pub use listener::{
    DataWriterListener, LivelinessLostStatus, OfferedDeadlineMissedStatus,
    OfferedIncompatibleQosStatus, PublicationMatchedStatus, StatusMask,
};
pub use participant::{DdsType, Locator, ParticipantContext, TransportSink};
pub use persistence::{MemoryStore, PersistedSample, PersistenceStore};
pub use publisher::Publisher;
pub use qos::{QoS, RequestedQos};
pub use reliability::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg, NackFragMsg};
pub use writer::{DataWriter, DataWriterBuilder, InstanceState, ReaderInfo};

/// wdds version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
