// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Matching callbacks, liveliness, fragmentation and flow-controller
//! behavior seen from the public API.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{best_effort_reader, reliable_reader, RecordingTransport, Reading};
use wdds::flow::{FlowController, FlowControllerConfig};
use wdds::qos::{Liveliness, ReliabilityKind};
use wdds::reliability::messages::tag;
use wdds::{
    DataWriter, DataWriterBuilder, DataWriterListener, DdsType, Error, Guid,
    LivelinessLostStatus, Locator, OfferedIncompatibleQosStatus, ParticipantContext,
    PublicationMatchedStatus, QoS, RequestedQos, Result, SchedulingPolicy, TopicKind,
    TransportSink,
};

fn participant(transport: &Arc<RecordingTransport>) -> Arc<ParticipantContext> {
    ParticipantContext::new([6u8; 12], Arc::clone(transport) as Arc<dyn TransportSink>)
}

fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_incompatible_reader_is_not_matched() {
    struct IncompatListener {
        count: AtomicU32,
    }

    impl DataWriterListener for IncompatListener {
        fn on_offered_incompatible_qos(&self, status: OfferedIncompatibleQosStatus) {
            assert!(status.last_policy_id.is_some());
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    let listener = Arc::new(IncompatListener {
        count: AtomicU32::new(0),
    });
    let transport = RecordingTransport::new();
    // Best-effort writer cannot serve a reliable reader.
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::best_effort())
    .listener(Arc::clone(&listener) as Arc<dyn DataWriterListener>)
    .build()
    .expect("writer");

    writer.reader_matched(reliable_reader(1, 7411));
    assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    assert_eq!(writer.publication_matched_status().current_count, 0);

    // Nothing is matched, so writes reach no locator.
    writer.write(&Reading { value: 1 }).expect("write");
    assert!(transport.data_seqs().is_empty());

    let status = writer.offered_incompatible_qos_status();
    assert_eq!(status.total_count, 1);
}

#[test]
fn test_publication_matched_status_counts() {
    struct MatchListener {
        events: AtomicU32,
    }

    impl DataWriterListener for MatchListener {
        fn on_publication_matched(&self, status: PublicationMatchedStatus) {
            // The pre-reset snapshot carries the delta.
            assert_ne!(status.current_count_change, 0);
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    let listener = Arc::new(MatchListener {
        events: AtomicU32::new(0),
    });
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable())
    .listener(Arc::clone(&listener) as Arc<dyn DataWriterListener>)
    .build()
    .expect("writer");

    let reader = reliable_reader(1, 7411);
    let reader_guid = reader.guid;
    writer.reader_matched(reader);
    writer.reader_matched(best_effort_reader(2, 7412));

    let status = writer.publication_matched_status();
    assert_eq!(status.total_count, 2);
    assert_eq!(status.current_count, 2);

    writer.reader_unmatched(reader_guid);
    let status = writer.publication_matched_status();
    assert_eq!(status.total_count, 2);
    assert_eq!(status.current_count, 1);
    assert_eq!(listener.events.load(Ordering::SeqCst), 3);
}

#[test]
fn test_manual_liveliness_lost_and_reasserted() {
    struct LostListener {
        count: AtomicU32,
    }

    impl DataWriterListener for LostListener {
        fn on_liveliness_lost(&self, status: LivelinessLostStatus) {
            assert!(status.total_count >= 1);
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    let listener = Arc::new(LostListener {
        count: AtomicU32::new(0),
    });
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable().liveliness(Liveliness::manual_by_topic(Duration::from_millis(60))))
    .listener(Arc::clone(&listener) as Arc<dyn DataWriterListener>)
    .build()
    .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    // No assertion within the lease: liveliness is lost.
    wait_until(
        || listener.count.load(Ordering::SeqCst) >= 1,
        "liveliness lost",
    );
    assert!(writer.liveliness_lost_status().total_count >= 1);

    // A manual assertion emits a liveliness-flagged heartbeat.
    writer.assert_liveliness().expect("assert");
    assert!(transport
        .heartbeats()
        .iter()
        .any(|hb| hb.liveliness));
}

#[test]
fn test_automatic_liveliness_asserts_periodically() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::best_effort().liveliness(Liveliness::automatic(Duration::from_millis(90))))
    .build()
    .expect("writer");
    writer.reader_matched(best_effort_reader(1, 7411));

    // The automatic cohort announces at lease/3 = 30 ms without any writes.
    wait_until(
        || transport.heartbeats().iter().filter(|hb| hb.liveliness).count() >= 2,
        "automatic liveliness assertions",
    );
    assert_eq!(writer.liveliness_lost_status().total_count, 0);
}

/// Opaque blob for fragmentation tests.
struct Blob(Vec<u8>);

impl DdsType for Blob {
    fn type_name() -> &'static str {
        "Blob"
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.0.len() {
            return Err(Error::Serialization);
        }
        buf[..self.0.len()].copy_from_slice(&self.0);
        Ok(self.0.len())
    }
}

/// Transport with a small datagram limit to force fragmentation.
struct SmallDatagramTransport {
    inner: Arc<RecordingTransport>,
    max: usize,
}

impl TransportSink for SmallDatagramTransport {
    fn send(&self, buffers: &[&[u8]], sender: Guid, locators: &[Locator], deadline: Instant) -> bool {
        self.inner.send(buffers, sender, locators, deadline)
    }

    fn max_datagram_size(&self) -> usize {
        self.max
    }
}

#[test]
fn test_oversized_sample_fragments_on_async_writer() {
    let recording = RecordingTransport::new();
    let transport = Arc::new(SmallDatagramTransport {
        inner: Arc::clone(&recording),
        max: 1024,
    });
    let ctx = ParticipantContext::new([6u8; 12], transport as Arc<dyn TransportSink>);
    let controller = FlowController::new(
        FlowControllerConfig::async_with(SchedulingPolicy::Fifo),
        ctx.change_pool(),
    )
    .expect("controller");

    let writer: DataWriter<Blob> = DataWriterBuilder::new(ctx, "blobs", TopicKind::Unkeyed)
        .qos(QoS::reliable().keep_all().asynchronous())
        .flow_controller(controller)
        .build()
        .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    writer.write(&Blob(vec![0xAB; 3000])).expect("write");

    // ~1 KB budget minus header => 4 fragments.
    wait_until(
        || {
            recording
                .messages()
                .iter()
                .filter(|m| m.tag == tag::DATA_FRAG)
                .count()
                >= 3
        },
        "fragmented delivery",
    );
    let frags: Vec<u32> = recording
        .data_headers()
        .iter()
        .filter(|h| h.fragment_size > 0)
        .map(|h| h.fragment_number)
        .collect();
    // Fragment numbers are 1-based and increasing.
    assert_eq!(frags, (1..=frags.len() as u32).collect::<Vec<_>>());
}

#[test]
fn test_oversized_sample_rejected_on_sync_writer() {
    let recording = RecordingTransport::new();
    let transport = Arc::new(SmallDatagramTransport {
        inner: Arc::clone(&recording),
        max: 1024,
    });
    let ctx = ParticipantContext::new([6u8; 12], transport as Arc<dyn TransportSink>);

    let writer: DataWriter<Blob> = DataWriterBuilder::new(ctx, "blobs", TopicKind::Unkeyed)
        .qos(QoS::reliable().keep_all())
        .build()
        .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    let err = writer
        .write(&Blob(vec![0xAB; 3000]))
        .expect_err("oversized synchronous sample");
    assert!(matches!(err, Error::Generic(_)));
    // Small samples still go through.
    writer.write(&Blob(vec![0xAB; 100])).expect("write");
}

#[test]
fn test_transient_local_redelivers_history_to_late_joiner() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable().keep_all().transient_local())
    .build()
    .expect("writer");

    writer.write(&Reading { value: 1 }).expect("write");
    writer.write(&Reading { value: 2 }).expect("write");
    // Nothing on the wire yet: no matched reader.
    assert!(transport.data_seqs().is_empty());

    let late = wdds::ReaderInfo {
        guid: common::reader_guid(1),
        locators: vec![common::reader_locator(7411)],
        qos: RequestedQos {
            reliability: ReliabilityKind::Reliable,
            durability: wdds::qos::Durability::TransientLocal,
            ..RequestedQos::default()
        },
    };
    writer.reader_matched(late);

    // The retained history is redelivered to the late joiner.
    wait_until(|| transport.data_seqs() == vec![1, 2], "history redelivery");
}

#[test]
fn test_best_effort_volatile_releases_after_delivery() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::best_effort())
    .build()
    .expect("writer");
    writer.reader_matched(best_effort_reader(1, 7411));

    for value in 1..=5 {
        writer.write(&Reading { value }).expect("write");
    }
    assert_eq!(transport.data_seqs(), vec![1, 2, 3, 4, 5]);
    // Delivered best-effort samples are not retained.
    assert_eq!(writer.history_len(), 0);
}
