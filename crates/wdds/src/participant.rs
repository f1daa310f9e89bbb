// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Participant boundary consumed by the publication core.
//!
//! Transport, discovery and the type runtime are external collaborators;
//! this module pins down their contracts ([`TransportSink`], [`DdsType`],
//! the matched-reader callbacks on the writer) and provides the glue the
//! core needs from the participant: identity, the event loop, and the shared
//! pools.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::event_loop::EventLoop;
use crate::core::pool::{ChangePool, PayloadPool};
use crate::core::types::{EntityId, Guid, GuidPrefix};
use crate::error::{Error, Result};

/// Where a datagram is sent; discovery supplies these per matched reader.
pub type Locator = SocketAddr;

/// Transport send boundary.
///
/// One call per protocol message. `buffers` are gathered (header + payload
/// fragments); the implementation either enqueues all of them on every
/// locator before `deadline` or reports failure.
pub trait TransportSink: Send + Sync {
    /// Send one message to the given locators. Returns `false` on
    /// backpressure or transport failure; the flow controller decides
    /// whether to re-queue.
    fn send(
        &self,
        buffers: &[&[u8]],
        sender: Guid,
        locators: &[Locator],
        deadline: Instant,
    ) -> bool;

    /// Usable payload bytes per datagram; bounds the fragment size.
    fn max_datagram_size(&self) -> usize {
        65_500
    }
}

/// Contract supplied by the registered type descriptor.
///
/// The writer serializes through this trait and derives instance identity
/// from the key fields of keyed types.
pub trait DdsType: Send + Sync + Sized + 'static {
    /// Registered type name.
    fn type_name() -> &'static str;

    /// Serialize the full sample into `buf`, returning the encoded length.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` when the buffer is too small or the sample
    /// cannot be encoded.
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// Serialize only the key fields. Unkeyed types encode nothing.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` on encoding failure.
    fn encode_key(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    /// Rebuild a sample whose key fields are taken from `key`; non-key
    /// fields are defaulted. Required for `key_value` on keyed types.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` for types without key reconstruction.
    fn decode_key(_key: &[u8]) -> Result<Self> {
        Err(Error::Unsupported)
    }
}

/// Participant glue: identity, event loop, shared pools, transport handle.
///
/// The surrounding participant (bootstrap, discovery, reception) is out of
/// scope; the core only consumes this narrow surface.
pub struct ParticipantContext {
    guid_prefix: GuidPrefix,
    event_loop: Arc<EventLoop>,
    transport: Arc<dyn TransportSink>,
    change_pool: Arc<ChangePool>,
    payload_pool: Arc<PayloadPool>,
    next_entity_key: AtomicU32,
    /// Last assertion of the manual-by-participant liveliness cohort.
    last_participant_assertion: Mutex<Instant>,
}

impl ParticipantContext {
    /// Default change-arena capacity shared by the participant's writers.
    pub const DEFAULT_CHANGE_CAPACITY: usize = 8192;

    /// Create the glue with default pools and a fresh event loop.
    #[must_use]
    pub fn new(guid_prefix: GuidPrefix, transport: Arc<dyn TransportSink>) -> Arc<Self> {
        Self::with_pools(
            guid_prefix,
            transport,
            Arc::new(ChangePool::with_capacity(Self::DEFAULT_CHANGE_CAPACITY)),
            Arc::new(PayloadPool::new()),
        )
    }

    /// Create the glue sharing externally-owned pools.
    #[must_use]
    pub fn with_pools(
        guid_prefix: GuidPrefix,
        transport: Arc<dyn TransportSink>,
        change_pool: Arc<ChangePool>,
        payload_pool: Arc<PayloadPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            guid_prefix,
            event_loop: EventLoop::spawn(),
            transport,
            change_pool,
            payload_pool,
            next_entity_key: AtomicU32::new(1),
            last_participant_assertion: Mutex::new(Instant::now()),
        })
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    #[must_use]
    pub fn event_loop(&self) -> Arc<EventLoop> {
        Arc::clone(&self.event_loop)
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn TransportSink> {
        Arc::clone(&self.transport)
    }

    #[must_use]
    pub fn change_pool(&self) -> Arc<ChangePool> {
        Arc::clone(&self.change_pool)
    }

    #[must_use]
    pub fn payload_pool(&self) -> Arc<PayloadPool> {
        Arc::clone(&self.payload_pool)
    }

    /// Mint a GUID for the next writer of this participant.
    #[must_use]
    pub fn next_writer_guid(&self) -> Guid {
        let key = self.next_entity_key.fetch_add(1, Ordering::Relaxed);
        Guid::new(self.guid_prefix, EntityId::user_writer(key))
    }

    /// Assert the manual-by-participant liveliness cohort. Every successful
    /// write/register/dispose of any contained writer also lands here.
    pub fn assert_liveliness(&self) {
        *self.last_participant_assertion.lock() = Instant::now();
    }

    /// Time since the participant cohort last asserted.
    #[must_use]
    pub fn participant_assertion_age(&self) -> Duration {
        self.last_participant_assertion.lock().elapsed()
    }
}
