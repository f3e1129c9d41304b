use std::time::Duration;

use radiomesh_core::config::{LinkConfig, QueueCapacities};
use radiomesh_core::wire::{encode_fragment, FRAGMENT_PAYLOAD_MAX, LINK_MESSAGE_MAX};
use radiomesh_core::{LinkClass, MacAddr, Wait};
use radiomesh_transport::TransportError;

use crate::*;

const WAIT: Wait = Wait::Within(Duration::from_secs(2));

/// 300 bytes on the provisioning class: two fragments, one message.
#[tokio::test]
async fn provisioning_message_spans_two_fragments() -> anyhow::Result<()> {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Provision)?;

    let data = pattern(300, 1);
    let written = a
        .transport
        .write(LinkClass::Provision, PEER_B, &data, WAIT)
        .await?;
    assert_eq!(written, 300);
    assert_eq!(a.radio.frames_sent(), 2);

    let msg = b.transport.read(LinkClass::Provision, WAIT).await?;
    assert!(msg.complete);
    assert_eq!(msg.peer, PEER_A);
    assert_eq!(&msg.data[..], &data[..]);
    Ok(())
}

#[tokio::test]
async fn messages_round_trip_at_fragment_boundaries() -> anyhow::Result<()> {
    let (a, b) = link_pair(roomy_link_config());
    b.transport.enable(LinkClass::Bulk)?;

    let lengths = [
        1,
        FRAGMENT_PAYLOAD_MAX - 1,
        FRAGMENT_PAYLOAD_MAX,
        FRAGMENT_PAYLOAD_MAX + 1,
        4 * FRAGMENT_PAYLOAD_MAX,
        LINK_MESSAGE_MAX,
    ];
    for (i, len) in lengths.into_iter().enumerate() {
        let data = pattern(len, i as u8);
        a.transport.write(LinkClass::Bulk, PEER_B, &data, WAIT).await?;
        let msg = b.transport.read(LinkClass::Bulk, WAIT).await?;
        assert!(msg.complete, "len {len}");
        assert_eq!(msg.data.len(), len);
        assert_eq!(&msg.data[..], &data[..], "len {len}");
    }
    assert_eq!(b.transport.stats().messages_received, lengths.len() as u64);
    Ok(())
}

#[tokio::test]
async fn full_queue_drops_oldest_fragment() {
    let (_a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control).unwrap();
    let capacity = LinkConfig::default().queue_capacity.control;

    for i in 0..=capacity {
        let frame = encode_fragment(PEER_A, LinkClass::Control, 0, &[i as u8]).unwrap();
        b.radio.inject(PEER_A, &frame);
    }
    assert_eq!(b.transport.stats().fragments_evicted, 1);

    for i in 1..=capacity {
        let msg = b.transport.read(LinkClass::Control, Wait::POLL).await.unwrap();
        assert_eq!(&msg.data[..], &[i as u8]);
    }
    assert_eq!(
        b.transport.read(LinkClass::Control, Wait::POLL).await,
        Err(TransportError::Timeout)
    );
}

#[tokio::test]
async fn zero_remaining_completes_after_one_fragment() {
    let (_a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Debug).unwrap();
    let first = encode_fragment(PEER_A, LinkClass::Debug, 0, b"solo").unwrap();
    let stray = encode_fragment(MacAddr::ZERO, LinkClass::Debug, 0, b"next").unwrap();
    b.radio.inject(PEER_A, &first);
    b.radio.inject(PEER_A, &stray);

    let msg = b.transport.read(LinkClass::Debug, Wait::POLL).await.unwrap();
    assert!(msg.complete);
    assert_eq!(&msg.data[..], b"solo");
}

#[tokio::test]
async fn foreign_and_disabled_traffic_is_discarded() {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control).unwrap();

    let mut foreign = encode_fragment(PEER_A, LinkClass::Control, 0, b"x").unwrap();
    foreign[0] ^= 0xff;
    b.radio.inject(PEER_A, &foreign);
    a.transport.write(LinkClass::Bulk, PEER_B, b"nobody listens", WAIT).await.unwrap();

    assert_eq!(
        b.transport.read(LinkClass::Control, Wait::millis(20)).await,
        Err(TransportError::Timeout)
    );
    assert_eq!(b.transport.stats().frames_discarded, 2);
}

#[tokio::test]
async fn classes_are_independent() -> anyhow::Result<()> {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control)?;
    b.transport.enable(LinkClass::Bulk)?;

    a.transport.write(LinkClass::Bulk, PEER_B, &pattern(700, 3), WAIT).await?;
    a.transport.write(LinkClass::Control, PEER_B, b"stop", WAIT).await?;

    let control = b.transport.read(LinkClass::Control, WAIT).await?;
    assert_eq!(&control.data[..], b"stop");
    let bulk = b.transport.read(LinkClass::Bulk, WAIT).await?;
    assert_eq!(bulk.data.len(), 700);
    Ok(())
}

/// A message longer than the class queue loses its first fragment; the
/// orphaned continuations must not surface as a message of their own.
#[tokio::test]
async fn message_overflowing_the_queue_is_not_delivered_headless() -> anyhow::Result<()> {
    let config = LinkConfig {
        queue_capacity: QueueCapacities {
            control: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let (a, b) = link_pair(config);
    b.transport.enable(LinkClass::Control)?;

    a.transport.write(LinkClass::Control, PEER_B, &pattern(600, 7), WAIT).await?;
    assert_eq!(
        b.transport.read(LinkClass::Control, Wait::millis(30)).await,
        Err(TransportError::Timeout)
    );
    let stats = b.transport.stats();
    assert_eq!(stats.fragments_evicted, 1);
    assert_eq!(stats.frames_discarded, 2);
    assert_eq!(stats.messages_received, 0);

    let data = pattern(200, 8);
    a.transport.write(LinkClass::Control, PEER_B, &data, WAIT).await?;
    let msg = b.transport.read(LinkClass::Control, WAIT).await?;
    assert!(msg.complete);
    assert_eq!(msg.peer, PEER_A);
    assert_eq!(&msg.data[..], &data[..]);
    Ok(())
}

#[tokio::test]
async fn disabling_a_class_releases_its_reader() -> anyhow::Result<()> {
    let (_a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Debug)?;
    let reader = {
        let t = b.transport.clone();
        tokio::spawn(async move { t.read(LinkClass::Debug, Wait::Forever).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    b.transport.disable(LinkClass::Debug)?;

    let result = tokio::time::timeout(Duration::from_secs(1), reader).await??;
    assert_eq!(result, Err(TransportError::ClassDisabled(LinkClass::Debug)));
    Ok(())
}

#[tokio::test]
async fn concurrent_writers_never_interleave() {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Bulk).unwrap();

    let first = pattern(1000, 10);
    let second = pattern(1000, 20);
    let w1 = {
        let t = a.transport.clone();
        let data = first.clone();
        tokio::spawn(async move { t.write(LinkClass::Bulk, PEER_B, &data, WAIT).await })
    };
    let w2 = {
        let t = a.transport.clone();
        let data = second.clone();
        tokio::spawn(async move { t.write(LinkClass::Bulk, PEER_B, &data, WAIT).await })
    };
    w1.await.unwrap().unwrap();
    w2.await.unwrap().unwrap();

    let mut got = vec![
        b.transport.read(LinkClass::Bulk, WAIT).await.unwrap().data.to_vec(),
        b.transport.read(LinkClass::Bulk, WAIT).await.unwrap().data.to_vec(),
    ];
    got.sort();
    let mut want = vec![first, second];
    want.sort();
    assert_eq!(got, want);
}

#[tokio::test]
async fn failed_write_is_left_to_the_caller_to_retry() {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Bulk).unwrap();
    let data = pattern(600, 5);

    a.radio.lose_next_frames(1);
    let err = a
        .transport
        .write(LinkClass::Bulk, PEER_B, &data, WAIT)
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::SendFailed { peer: PEER_B });
    assert_eq!(a.radio.frames_sent(), 1);

    a.transport.write(LinkClass::Bulk, PEER_B, &data, WAIT).await.unwrap();
    let msg = b.transport.read(LinkClass::Bulk, WAIT).await.unwrap();
    assert!(msg.complete);
    assert_eq!(&msg.data[..], &data[..]);
}

#[tokio::test]
async fn broadcast_reaches_listeners_without_a_peer_entry() -> anyhow::Result<()> {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control)?;
    a.transport
        .write(LinkClass::Control, MacAddr::BROADCAST, b"hello all", WAIT)
        .await?;
    assert!(a.transport.peers().is_empty());

    let msg = b.transport.read(LinkClass::Control, WAIT).await?;
    assert_eq!(msg.peer, PEER_A);
    assert_eq!(&msg.data[..], b"hello all");
    Ok(())
}

#[tokio::test]
async fn reader_waiting_forever_wakes_on_arrival() {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control).unwrap();
    let reader = {
        let t = b.transport.clone();
        tokio::spawn(async move { t.read(LinkClass::Control, Wait::Forever).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    a.transport.write(LinkClass::Control, PEER_B, b"late", WAIT).await.unwrap();
    let msg = reader.await.unwrap().unwrap();
    assert_eq!(&msg.data[..], b"late");
}

#[tokio::test]
async fn stats_snapshot_serializes_for_reporting() -> anyhow::Result<()> {
    let (a, b) = link_pair(LinkConfig::default());
    b.transport.enable(LinkClass::Control)?;
    a.transport.write(LinkClass::Control, PEER_B, b"ping", WAIT).await?;
    b.transport.read(LinkClass::Control, WAIT).await?;

    let sent = serde_json::to_value(a.transport.stats())?;
    assert_eq!(sent["messages_sent"], 1);
    assert_eq!(sent["bytes_sent"], 4);
    let received = serde_json::to_value(b.transport.stats())?;
    assert_eq!(received["messages_received"], 1);
    assert_eq!(received["short_reads"], 0);
    Ok(())
}
