//! Passive synchronization over an in-process duplex channel
//!
//! The active side streams entity snapshots with `ActiveSyncSender`; the
//! passive side rebuilds them with `receive_stream` into a `RecordingSink`.

use standby_core::Error;
use standby_core::config::SyncConfig;
use standby_core::sync::{
    ActiveSyncSender, EntitySnapshot, PassiveSyncReceiver, ReplicationEnvelope, ReplicationType, SyncMessage,
    SyncState, receive_stream,
};
use standby_core::testing::RecordingSink;
use standby_core::types::{EntityId, PartitionKey};
use tokio::io::AsyncWriteExt;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn key(raw: u32) -> PartitionKey {
    PartitionKey::new(raw).unwrap()
}

fn snapshots() -> Vec<EntitySnapshot> {
    vec![
        EntitySnapshot::new(EntityId::new("map", "sessions"), 4, b"cfg-1".to_vec(), true)
            .with_partition(key(1), vec![1u8; 10_000])
            .with_partition(key(2), b"small".to_vec()),
        EntitySnapshot::new(EntityId::new("counter", "hits"), 1, Vec::new(), false),
    ]
}

#[tokio::test]
async fn test_full_stream_over_duplex() {
    init_tracing();
    let (mut active, mut passive) = tokio::io::duplex(4096);

    let writer = tokio::spawn(async move {
        let mut sender = ActiveSyncSender::new(SyncConfig {
            max_payload_chunk: 1024,
            ..SyncConfig::default()
        });
        sender
            .send_stream(&mut active, &snapshots(), b"trailer".to_vec())
            .await
            .unwrap();
        sender.stats().clone()
    });

    let mut sink = RecordingSink::default();
    let stats = receive_stream(&mut passive, &mut sink).await.unwrap();
    let sent = writer.await.unwrap();

    assert_eq!(stats.units, sent.units);
    assert_eq!(stats.entities, 2);
    assert_eq!(sink.trailer, Some(b"trailer".to_vec()));
    assert_eq!(sink.discards, 0);

    let sessions = EntityId::new("map", "sessions");
    assert_eq!(sink.partition_state(&sessions, key(1)), Some(vec![1u8; 10_000]));
    assert_eq!(sink.partition_state(&sessions, key(2)), Some(b"small".to_vec()));

    let hits = &sink.entities[&EntityId::new("counter", "hits")];
    assert!(hits.complete);
    assert!(!hits.deletable);
    assert!(hits.partitions.is_empty());
}

#[tokio::test]
async fn test_live_operations_interleave() {
    init_tracing();
    let (mut active, mut passive) = tokio::io::duplex(4096);

    let mut sender = ActiveSyncSender::new(SyncConfig::default());
    let units = vec![
        sender.begin_stream().unwrap().to_envelope(),
        ReplicationEnvelope::empty(ReplicationType::InvokeAction),
        sender
            .begin_entity(EntityId::new("map", "a"), 1, Vec::new(), true)
            .unwrap()
            .to_envelope(),
        ReplicationEnvelope::empty(ReplicationType::Noop),
        sender.end_entity().unwrap().to_envelope(),
        sender.end_stream(Vec::new()).unwrap().to_envelope(),
    ];
    for envelope in &units {
        envelope.write_to(&mut active).await.unwrap();
    }

    let mut sink = RecordingSink::default();
    let stats = receive_stream(&mut passive, &mut sink).await.unwrap();
    assert_eq!(stats.replicated, 2);
    assert_eq!(sink.replicated.len(), 2);
    assert_eq!(sink.replicated[0].message_type, ReplicationType::InvokeAction);
}

#[tokio::test]
async fn test_stream_cut_off_is_discarded() {
    init_tracing();
    let (mut active, mut passive) = tokio::io::duplex(4096);

    let mut sender = ActiveSyncSender::new(SyncConfig::default());
    sender.begin_stream().unwrap().to_envelope().write_to(&mut active).await.unwrap();
    sender
        .begin_entity(EntityId::new("map", "a"), 1, Vec::new(), true)
        .unwrap()
        .to_envelope()
        .write_to(&mut active)
        .await
        .unwrap();
    active.shutdown().await.unwrap();
    drop(active);

    let mut sink = RecordingSink::default();
    let err = receive_stream(&mut passive, &mut sink).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(sink.discards, 1);
    assert!(sink.entities.is_empty());
    assert_eq!(sink.trailer, None);
}

#[tokio::test]
async fn test_corrupted_frame_aborts_attempt() {
    init_tracing();
    let (mut active, mut passive) = tokio::io::duplex(4096);

    let mut frame = SyncMessage::StreamBegin.encode().unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    active.write_all(&frame).await.unwrap();

    let mut sink = RecordingSink::default();
    let err = receive_stream(&mut passive, &mut sink).await.unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
    assert_eq!(sink.discards, 1);
}

#[tokio::test]
async fn test_out_of_order_unit_is_a_protocol_violation() {
    init_tracing();
    let (mut active, mut passive) = tokio::io::duplex(4096);

    SyncMessage::StreamBegin.to_envelope().write_to(&mut active).await.unwrap();
    SyncMessage::EntityEnd {
        entity: EntityId::new("map", "a"),
        version: 1,
    }
    .to_envelope()
    .write_to(&mut active)
    .await
    .unwrap();

    let mut sink = RecordingSink::default();
    let err = receive_stream(&mut passive, &mut sink).await.unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(sink.discards, 1);
}

#[test]
fn test_partition_key_zero_on_the_wire() {
    let mut envelope = ReplicationEnvelope::empty(ReplicationType::SyncEntityConcurrencyBegin);
    envelope.entity = EntityId::new("map", "a");
    envelope.version = 1;
    envelope.concurrency = 0;

    let mut receiver = PassiveSyncReceiver::new(RecordingSink::default());
    receiver.accept(SyncMessage::StreamBegin).unwrap();
    let err = receiver.accept_envelope(envelope).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(receiver.state(), SyncState::Failed);
    assert_eq!(receiver.sink().discards, 1);
}

#[test]
fn test_new_attempt_restarts_from_stream_begin() {
    let mut first = PassiveSyncReceiver::new(RecordingSink::default());
    first.accept(SyncMessage::StreamBegin).unwrap();
    first.abort("connection reset");
    let sink = first.into_sink();
    assert_eq!(sink.discards, 1);

    let mut second = PassiveSyncReceiver::new(sink);
    assert!(
        second
            .accept(SyncMessage::EntityEnd {
                entity: EntityId::new("map", "a"),
                version: 1,
            })
            .is_err()
    );

    let mut third = PassiveSyncReceiver::new(RecordingSink::default());
    third.accept(SyncMessage::StreamBegin).unwrap();
    third.accept(SyncMessage::StreamEnd { trailer: Vec::new() }).unwrap();
    third.finish().unwrap();
}
