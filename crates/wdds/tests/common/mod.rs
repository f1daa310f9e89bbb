// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Shared fixtures: a recording transport standing in for the datagram
//! layer, and simple test types.
#![allow(dead_code)] // each integration test binary uses a different subset

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use wdds::reliability::messages::{tag, DataMsg, GapMsg, HeartbeatMsg};
use wdds::{DdsType, Error, Guid, Locator, RequestedQos, Result, TransportSink};

/// One message observed on the wire.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub tag: u8,
    pub data: Option<DataMsg>,
    pub heartbeat: Option<HeartbeatMsg>,
    pub gap: Option<GapMsg>,
    pub payload: Vec<u8>,
    pub locators: Vec<Locator>,
}

/// Transport double that records everything a writer sends.
pub struct RecordingTransport {
    messages: Mutex<Vec<Recorded>>,
    /// When true, sends are refused (backpressure simulation).
    refuse: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            refuse: Mutex::new(false),
        })
    }

    pub fn set_refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn messages(&self) -> Vec<Recorded> {
        self.messages.lock().clone()
    }

    /// Sequence numbers of DATA messages in send order (fragments count
    /// once per fragment).
    pub fn data_seqs(&self) -> Vec<u64> {
        self.messages()
            .into_iter()
            .filter(|m| m.tag == tag::DATA || m.tag == tag::DATA_FRAG)
            .filter_map(|m| m.data.map(|d| d.sequence_number))
            .collect()
    }

    pub fn data_headers(&self) -> Vec<DataMsg> {
        self.messages()
            .into_iter()
            .filter_map(|m| m.data)
            .collect()
    }

    pub fn gaps(&self) -> Vec<GapMsg> {
        self.messages().into_iter().filter_map(|m| m.gap).collect()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatMsg> {
        self.messages()
            .into_iter()
            .filter_map(|m| m.heartbeat)
            .collect()
    }
}

impl TransportSink for RecordingTransport {
    fn send(
        &self,
        buffers: &[&[u8]],
        _sender: Guid,
        locators: &[Locator],
        _deadline: Instant,
    ) -> bool {
        if *self.refuse.lock() {
            return false;
        }
        let msg_tag = buffers.first().and_then(|b| b.first()).copied().unwrap_or(0);
        let body = buffers.get(1).copied().unwrap_or(&[]);
        let payload = buffers.get(2).copied().unwrap_or(&[]).to_vec();

        let recorded = Recorded {
            tag: msg_tag,
            data: (msg_tag == tag::DATA || msg_tag == tag::DATA_FRAG)
                .then(|| DataMsg::decode(body))
                .flatten(),
            heartbeat: (msg_tag == tag::HEARTBEAT)
                .then(|| HeartbeatMsg::decode(body))
                .flatten(),
            gap: (msg_tag == tag::GAP).then(|| GapMsg::decode(body)).flatten(),
            payload,
            locators: locators.to_vec(),
        };
        self.messages.lock().push(recorded);
        true
    }
}

/// Keyed test type: the sensor id is the key.
pub struct Sensor {
    pub id: u32,
    pub value: f32,
}

impl DdsType for Sensor {
    fn type_name() -> &'static str {
        "Sensor"
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 8 {
            return Err(Error::Serialization);
        }
        buf[..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.value.to_le_bytes());
        Ok(8)
    }

    fn encode_key(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 4 {
            return Err(Error::Serialization);
        }
        buf[..4].copy_from_slice(&self.id.to_le_bytes());
        Ok(4)
    }

    fn decode_key(key: &[u8]) -> Result<Self> {
        if key.len() < 4 {
            return Err(Error::Serialization);
        }
        Ok(Sensor {
            id: u32::from_le_bytes([key[0], key[1], key[2], key[3]]),
            value: 0.0,
        })
    }
}

/// Unkeyed test type.
pub struct Reading {
    pub value: u64,
}

impl DdsType for Reading {
    fn type_name() -> &'static str {
        "Reading"
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 8 {
            return Err(Error::Serialization);
        }
        buf[..8].copy_from_slice(&self.value.to_le_bytes());
        Ok(8)
    }
}

pub fn reader_locator(port: u16) -> Locator {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub fn reader_guid(id: u8) -> Guid {
    Guid::from_bytes([id; 16])
}

pub fn reliable_reader(id: u8, port: u16) -> wdds::ReaderInfo {
    wdds::ReaderInfo {
        guid: reader_guid(id),
        locators: vec![reader_locator(port)],
        qos: RequestedQos {
            reliability: wdds::qos::ReliabilityKind::Reliable,
            ..RequestedQos::default()
        },
    }
}

pub fn best_effort_reader(id: u8, port: u16) -> wdds::ReaderInfo {
    wdds::ReaderInfo {
        guid: reader_guid(id),
        locators: vec![reader_locator(port)],
        qos: RequestedQos::default(),
    }
}
