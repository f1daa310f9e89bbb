// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! End-to-end writer scenarios: delivery, eviction, deadlines, blocking,
//! coherent sets and lifespan expiry against a recording transport.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{reliable_reader, RecordingTransport, Reading, Sensor};
use parking_lot::Mutex;
use wdds::qos::ResourceLimits;
use wdds::reliability::AckNackMsg;
use wdds::{
    DataWriter, DataWriterBuilder, DataWriterListener, Error, InstanceHandle,
    OfferedDeadlineMissedStatus, ParticipantContext, Publisher, QoS, TopicKind,
};

fn participant(transport: &Arc<RecordingTransport>) -> Arc<ParticipantContext> {
    ParticipantContext::new([9u8; 12], Arc::clone(transport) as Arc<dyn wdds::TransportSink>)
}

fn ack_everything(writer: &DataWriter<Reading>, reader: wdds::Guid, up_to_exclusive: u64) {
    writer.handle_acknack(&AckNackMsg::new(reader, up_to_exclusive, vec![]));
}

// S1 - basic reliable delivery: three writes reach the wire in order, the
// acknowledged history drains for volatile durability.
#[test]
fn test_reliable_delivery_in_order_and_ack_drain() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable().keep_all().resource_limits(ResourceLimits {
        max_samples: 10,
        max_instances: wdds::qos::LENGTH_UNLIMITED,
        max_samples_per_instance: 10,
    }))
    .build()
    .expect("writer");

    let reader = reliable_reader(1, 7411);
    let reader_guid = reader.guid;
    writer.reader_matched(reader);

    writer.write(&Reading { value: 1 }).expect("write");
    writer.write(&Reading { value: 2 }).expect("write");
    writer.write(&Reading { value: 3 }).expect("write");

    assert_eq!(transport.data_seqs(), vec![1, 2, 3]);
    assert_eq!(writer.history_len(), 3);

    // Reader acks everything; wait_for_acknowledgments succeeds and the
    // volatile history drains.
    ack_everything(&writer, reader_guid, 4);
    writer
        .wait_for_acknowledgments(Duration::from_secs(1))
        .expect("acknowledged");
    assert_eq!(writer.history_len(), 0);
}

// S1 (transient-local variant): acked samples are retained for late joiners.
#[test]
fn test_transient_local_retains_acked_samples() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable().keep_all().transient_local())
    .build()
    .expect("writer");

    let reader = reliable_reader(1, 7411);
    let reader_guid = reader.guid;
    writer.reader_matched(reader);

    for value in 1..=3 {
        writer.write(&Reading { value }).expect("write");
    }
    ack_everything(&writer, reader_guid, 4);
    writer
        .wait_for_acknowledgments(Duration::from_secs(1))
        .expect("acknowledged");

    assert_eq!(writer.history_len(), 3);
}

// S2 - keep_last(2): five writes, at most two pending per instance, evicted
// oldest first.
#[test]
fn test_keep_last_eviction() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Sensor> = DataWriterBuilder::new(
        participant(&transport),
        "sensors",
        TopicKind::Keyed,
    )
    .qos(QoS::reliable().keep_last(2))
    .build()
    .expect("writer");

    writer.reader_matched(reliable_reader(1, 7411));

    let handle = writer
        .register_instance(&Sensor { id: 7, value: 0.0 })
        .expect("register");

    for i in 1..=5 {
        writer
            .write(&Sensor {
                id: 7,
                value: i as f32,
            })
            .expect("write");
        assert!(writer.samples_for_instance(handle) <= 2);
    }

    assert_eq!(writer.samples_for_instance(handle), 2);
    assert_eq!(writer.history_len(), 2);
    // All five went out in order before eviction caught up with the reader.
    assert_eq!(transport.data_seqs(), vec![1, 2, 3, 4, 5]);
}

// S3 - deadline misses fire the listener per silent period.
#[test]
fn test_deadline_missed_fires_per_period() {
    struct CountingListener {
        count: AtomicU32,
        last: Mutex<Option<InstanceHandle>>,
    }

    impl DataWriterListener for CountingListener {
        fn on_offered_deadline_missed(&self, status: OfferedDeadlineMissedStatus) {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = status.last_instance_handle;
        }
    }

    let listener = Arc::new(CountingListener {
        count: AtomicU32::new(0),
        last: Mutex::new(None),
    });

    let transport = RecordingTransport::new();
    let writer: DataWriter<Sensor> = DataWriterBuilder::new(
        participant(&transport),
        "sensors",
        TopicKind::Keyed,
    )
    .qos(QoS::default().deadline(Duration::from_millis(100)))
    .listener(Arc::clone(&listener) as Arc<dyn DataWriterListener>)
    .build()
    .expect("writer");

    let handle = writer
        .register_instance(&Sensor { id: 1, value: 0.0 })
        .expect("register");
    writer
        .write(&Sensor { id: 1, value: 1.0 })
        .expect("write");

    // No further writes: the 100 ms deadline lapses twice by ~250 ms.
    std::thread::sleep(Duration::from_millis(260));
    let fired = listener.count.load(Ordering::SeqCst);
    assert!((2..=3).contains(&fired), "expected ~2 misses, got {}", fired);
    assert_eq!(*listener.last.lock(), Some(handle));

    let status = writer.offered_deadline_missed_status();
    assert_eq!(status.total_count, fired);
    // Reading the status resets the delta.
    assert_eq!(writer.offered_deadline_missed_status().total_count_change, 0);
}

// S4 - keep_all with max_samples=1 blocks the second write for
// max_blocking_time, then times out.
#[test]
fn test_keep_all_full_history_blocks_then_times_out() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(
        QoS::reliable()
            .keep_all()
            .max_blocking_time(Duration::from_millis(50))
            .resource_limits(ResourceLimits {
                max_samples: 1,
                max_instances: wdds::qos::LENGTH_UNLIMITED,
                max_samples_per_instance: 1,
            }),
    )
    .build()
    .expect("writer");

    // Matched reliable reader that never acks.
    writer.reader_matched(reliable_reader(1, 7411));

    writer.write(&Reading { value: 1 }).expect("first write");

    let start = Instant::now();
    let err = writer
        .write(&Reading { value: 2 })
        .expect_err("history is full");
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::Timeout));
    assert!(elapsed >= Duration::from_millis(50), "returned too early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(120), "returned too late: {:?}", elapsed);
}

// S5 - all samples of a coherent span carry the same set id.
#[test]
fn test_coherent_set_stamps_samples() {
    let transport = RecordingTransport::new();
    let mut qos = QoS::reliable().keep_all();
    qos.presentation = wdds::qos::Presentation::coherent(wdds::qos::PresentationAccessScope::Topic);

    let publisher = Publisher::new(participant(&transport), qos).expect("publisher");
    let writer = publisher
        .create_writer_with_default_qos::<Reading>("readings", TopicKind::Unkeyed)
        .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    publisher.begin_coherent_changes().expect("begin");
    for value in 1..=3 {
        writer.write(&Reading { value }).expect("write");
    }
    publisher.end_coherent_changes().expect("end");

    // A write outside the span is unstamped.
    writer.write(&Reading { value: 4 }).expect("write");

    let headers = transport.data_headers();
    assert_eq!(headers.len(), 4);
    let set_id = headers[0].coherent_set;
    assert_ne!(set_id, 0);
    assert!(headers[..3].iter().all(|h| h.coherent_set == set_id));
    assert_eq!(headers[3].coherent_set, 0);
}

// S6 - lifespan removes expired samples oldest first until the history is
// empty.
#[test]
fn test_lifespan_expiry_drains_history() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(
        QoS::reliable()
            .keep_all()
            .transient_local()
            .lifespan(Duration::from_millis(200)),
    )
    .build()
    .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    writer.write(&Reading { value: 1 }).expect("write");
    std::thread::sleep(Duration::from_millis(50));
    writer.write(&Reading { value: 2 }).expect("write");

    assert_eq!(writer.history_len(), 2);

    // At ~120 ms both are within their 200 ms lifespan.
    std::thread::sleep(Duration::from_millis(70));
    assert_eq!(writer.history_len(), 2);

    // By ~300 ms the first expired, by ~400 ms both.
    std::thread::sleep(Duration::from_millis(180));
    assert!(writer.history_len() <= 1);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(writer.history_len(), 0);
}

// Sequence numbers stay contiguous from 1 across mixed operations.
#[test]
fn test_sequence_numbers_contiguous() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Sensor> = DataWriterBuilder::new(
        participant(&transport),
        "sensors",
        TopicKind::Keyed,
    )
    .qos(QoS::reliable().keep_all())
    .build()
    .expect("writer");
    writer.reader_matched(reliable_reader(1, 7411));

    let sample = Sensor { id: 3, value: 1.0 };
    writer.write(&sample).expect("write");
    writer.write(&sample).expect("write");
    let handle = writer.lookup_instance(&sample).expect("lookup");
    writer.dispose(&sample, handle).expect("dispose");

    let seqs = transport.data_seqs();
    assert_eq!(seqs, vec![1, 2, 3]);
}

// Explicit timestamps must be monotonically non-decreasing.
#[test]
fn test_backwards_source_timestamp_rejected() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .qos(QoS::reliable().keep_all())
    .build()
    .expect("writer");

    writer
        .write_with_timestamp(&Reading { value: 1 }, wdds::Timestamp::from_nanos(1_000))
        .expect("write");
    let err = writer
        .write_with_timestamp(&Reading { value: 2 }, wdds::Timestamp::from_nanos(500))
        .expect_err("regressing timestamp");
    assert!(matches!(err, Error::Generic(_)));

    // Equal timestamps are fine.
    writer
        .write_with_timestamp(&Reading { value: 3 }, wdds::Timestamp::from_nanos(1_000))
        .expect("write");
}

// Unkeyed topics reject instance operations.
#[test]
fn test_unkeyed_instance_operations_rejected() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Reading> = DataWriterBuilder::new(
        participant(&transport),
        "readings",
        TopicKind::Unkeyed,
    )
    .build()
    .expect("writer");

    let sample = Reading { value: 1 };
    let err = writer
        .unregister_instance(&sample, InstanceHandle(42))
        .expect_err("non-nil handle on unkeyed topic");
    assert!(matches!(err, Error::BadParameter(_)));

    let err = writer
        .unregister_instance(&sample, InstanceHandle::NIL)
        .expect_err("unregister on unkeyed topic");
    assert!(matches!(err, Error::IllegalOperation(_)));
}

// register_instance is idempotent and agrees with lookup_instance.
#[test]
fn test_register_lookup_idempotence() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Sensor> = DataWriterBuilder::new(
        participant(&transport),
        "sensors",
        TopicKind::Keyed,
    )
    .build()
    .expect("writer");

    let sample = Sensor { id: 11, value: 0.0 };
    assert!(writer.lookup_instance(&sample).expect("lookup").is_nil());

    let h1 = writer.register_instance(&sample).expect("register");
    let h2 = writer.register_instance(&sample).expect("register again");
    assert_eq!(h1, h2);
    assert_eq!(writer.lookup_instance(&sample).expect("lookup"), h1);

    // key_value reconstructs the key fields.
    let rebuilt = writer.key_value(h1).expect("key_value");
    assert_eq!(rebuilt.id, 11);
}

// Dispose then unregister walks the lifecycle to the terminal state; once
// acked the instance is reclaimed.
#[test]
fn test_dispose_unregister_lifecycle() {
    let transport = RecordingTransport::new();
    let writer: DataWriter<Sensor> = DataWriterBuilder::new(
        participant(&transport),
        "sensors",
        TopicKind::Keyed,
    )
    .qos(QoS::reliable().keep_all())
    .build()
    .expect("writer");
    let reader = reliable_reader(1, 7411);
    let reader_guid = reader.guid;
    writer.reader_matched(reader);

    let sample = Sensor { id: 5, value: 2.0 };
    let handle = writer.register_instance(&sample).expect("register");
    writer.write(&sample).expect("write");
    writer.dispose(&sample, handle).expect("dispose");
    writer.unregister_instance(&sample, handle).expect("unregister");

    // Dispose and unregister markers carry no payload.
    let headers = transport.data_headers();
    assert_eq!(headers.len(), 3);
    assert_eq!(headers[1].payload_len, 0);
    assert_eq!(headers[2].payload_len, 0);

    // Double unregister is a precondition error.
    let err = writer
        .unregister_instance(&sample, handle)
        .expect_err("double unregister");
    assert!(matches!(err, Error::PreconditionNotMet(_)));

    // After the reader acks everything the terminal instance is reclaimed.
    writer.handle_acknack(&AckNackMsg::new(reader_guid, 4, vec![]));
    writer
        .wait_for_acknowledgments(Duration::from_secs(1))
        .expect("acknowledged");
    assert!(writer.lookup_instance(&sample).expect("lookup").is_nil());
}
