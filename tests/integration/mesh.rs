use std::sync::Arc;
use std::time::Duration;

use radiomesh_core::config::MeshConfig;
use radiomesh_core::wire::{segment_count, MESH_MESSAGE_MAX, SEGMENT_PAYLOAD_MAX};
use radiomesh_core::{TypeFlags, Wait};
use radiomesh_transport::sim::{RecordingUpgradeWriter, SimMesh};
use radiomesh_transport::{MeshTransport, TransportError};

use crate::*;

const WAIT: Wait = Wait::Within(Duration::from_secs(2));

fn upward() -> TypeFlags {
    TypeFlags {
        to_server: true,
        ..Default::default()
    }
}

/// 3000 bytes inside the mesh: three segments, one packet id.
#[tokio::test]
async fn local_message_is_sent_as_three_segments() -> anyhow::Result<()> {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);

    let data = pattern(3000, 7);
    let sent = n1.transport.send(Some(NODE_2), TypeFlags::default(), &data).await?;
    assert_eq!(sent, 3000);

    let headers = n1.radio.sent_headers();
    assert_eq!(headers.len(), 3000usize.div_ceil(SEGMENT_PAYLOAD_MAX));
    assert!(headers.iter().all(|h| h.packet_id == headers[0].packet_id));

    let msg = n2.transport.recv(WAIT).await?;
    assert!(msg.complete);
    assert!(!msg.flags.to_server);
    assert_eq!(msg.data.len(), 3000);
    assert_eq!(&msg.data[..], &data[..]);
    Ok(())
}

#[tokio::test]
async fn messages_round_trip_at_segment_boundaries() {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);

    let lengths = [
        1,
        SEGMENT_PAYLOAD_MAX,
        SEGMENT_PAYLOAD_MAX + 1,
        10 * SEGMENT_PAYLOAD_MAX,
        MESH_MESSAGE_MAX,
    ];
    for (i, len) in lengths.into_iter().enumerate() {
        let data = pattern(len, i as u8);
        n1.transport.send(Some(NODE_2), TypeFlags::default(), &data).await.unwrap();
        let msg = n2.transport.recv(WAIT).await.unwrap();
        assert!(msg.complete, "len {len}");
        assert_eq!(&msg.data[..], &data[..], "len {len}");
    }
    let total_segments: usize = lengths.iter().map(|&l| segment_count(l)).sum();
    assert_eq!(n1.transport.stats().segments_sent, total_segments as u64);
}

#[tokio::test]
async fn retransmission_is_dropped_by_the_next_recv() {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);
    n1.radio.set_duplicate(true);

    let data = pattern(3000, 1);
    n1.transport.send(Some(NODE_2), TypeFlags::default(), &data).await.unwrap();

    let msg = n2.transport.recv(WAIT).await.unwrap();
    assert_eq!(&msg.data[..], &data[..]);
    assert_eq!(
        n2.transport.recv(Wait::millis(30)).await,
        Err(TransportError::Timeout)
    );
    assert!(n2.transport.stats().duplicates_dropped > 0);
}

#[tokio::test]
async fn same_payload_under_new_packet_id_is_delivered() {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);
    let data = pattern(2000, 9);

    n1.transport.send(Some(NODE_2), TypeFlags::default(), &data).await.unwrap();
    n1.transport.send(Some(NODE_2), TypeFlags::default(), &data).await.unwrap();

    let a = n2.transport.recv(WAIT).await.unwrap();
    let b = n2.transport.recv(WAIT).await.unwrap();
    assert_ne!(a.packet_id, b.packet_id);
    assert_eq!(a.data, b.data);
}

/// Upgrade segments go to the writer and never count towards recv's result.
#[tokio::test]
async fn upgrade_payload_is_diverted() -> anyhow::Result<()> {
    let mesh = SimMesh::new(ROOT);
    let root = mesh_node(&mesh, ROOT);
    let radio = mesh.node(NODE_1);
    let writer = Arc::new(RecordingUpgradeWriter::new());
    let n1 = MeshTransport::new(radio, MeshConfig::default()).with_upgrade_writer(writer.clone());

    let ota = TypeFlags {
        ota: true,
        ..Default::default()
    };
    let firmware = pattern(1200, 0xf0);
    root.transport.send(Some(NODE_1), ota, &firmware).await?;
    root.transport.send(Some(NODE_1), TypeFlags::default(), b"reboot at 03:00").await?;

    let msg = n1.recv(WAIT).await?;
    assert_eq!(&msg.data[..], b"reboot at 03:00");
    assert_eq!(msg.data.len(), 15);

    let segments = writer.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0, ROOT);
    assert!(segments[0].1.flags.ota);
    assert_eq!(&segments[0].2[..], &firmware[..]);
    assert_eq!(n1.stats().bytes_received, 15);
    Ok(())
}

/// A retransmitted upgrade image lands in the writer once per segment.
#[tokio::test]
async fn retransmitted_upgrade_is_written_once() -> anyhow::Result<()> {
    let mesh = SimMesh::new(ROOT);
    let root = mesh_node(&mesh, ROOT);
    let writer = Arc::new(RecordingUpgradeWriter::new());
    let n1 = MeshTransport::new(mesh.node(NODE_1), MeshConfig::default())
        .with_upgrade_writer(writer.clone());
    root.radio.set_duplicate(true);

    let ota = TypeFlags {
        ota: true,
        ..Default::default()
    };
    let firmware = pattern(3 * SEGMENT_PAYLOAD_MAX, 0x5a);
    root.transport.send(Some(NODE_1), ota, &firmware).await?;
    root.transport.send(Some(NODE_1), TypeFlags::default(), b"apply").await?;

    let msg = n1.recv(WAIT).await?;
    assert_eq!(&msg.data[..], b"apply");

    let written: Vec<u8> = writer
        .segments()
        .iter()
        .flat_map(|(_, _, payload)| payload.to_vec())
        .collect();
    assert_eq!(written, firmware);
    assert_eq!(n1.stats().ota_segments, 3);
    Ok(())
}

/// Silence on the root's external-bound inbox is not an error.
#[tokio::test]
async fn root_recv_times_out_cleanly() {
    let mesh = SimMesh::new(ROOT);
    let root = mesh_node(&mesh, ROOT);
    for _ in 0..3 {
        assert_eq!(root.transport.root_recv(Wait::millis(10)).await, Ok(None));
    }
    assert_eq!(root.transport.root_recv(Wait::POLL).await, Ok(None));
}

#[tokio::test]
async fn root_bridges_both_directions() -> anyhow::Result<()> {
    let mesh = SimMesh::new(ROOT);
    let root = mesh_node(&mesh, ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);
    let cloud = MacAddr([0x0e, 0, 0, 0, 0, 0x01]);

    n1.transport.send(None, upward(), &pattern(2500, 1)).await?;
    n2.transport.send(None, upward(), &pattern(900, 2)).await?;

    let mut origins = Vec::new();
    for _ in 0..2 {
        let msg = root
            .transport
            .root_recv(WAIT)
            .await?
            .ok_or_else(|| anyhow::anyhow!("root inbox empty"))?;
        assert!(msg.complete);
        assert!(msg.flags.to_server);
        origins.push(msg.origin.unwrap());
    }
    origins.sort_by_key(|a| a.octets());
    assert_eq!(origins, vec![NODE_1, NODE_2]);

    let reply = pattern(4000, 3);
    root.transport
        .root_send(NODE_2, cloud, TypeFlags::default(), &reply)
        .await?;
    let msg = n2.transport.recv(WAIT).await?;
    assert_eq!(msg.origin, Some(cloud));
    assert_eq!(&msg.data[..], &reply[..]);
    Ok(())
}

#[tokio::test]
async fn concurrent_senders_never_interleave_segments() {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    let n2 = mesh_node(&mesh, NODE_2);
    let sender = Arc::new(n1.transport);

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let sender = sender.clone();
            tokio::spawn(async move {
                sender
                    .send(Some(NODE_2), TypeFlags::default(), &pattern(3000, i))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let headers = n1.radio.sent_headers();
    for message in headers.chunks(3) {
        assert!(message.iter().all(|h| h.packet_id == message[0].packet_id));
        assert_eq!(message.iter().map(|h| h.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
    for _ in 0..4 {
        assert!(n2.transport.recv(WAIT).await.unwrap().complete);
    }
}

#[tokio::test]
async fn link_error_is_distinct_from_timeout() {
    let mesh = SimMesh::new(ROOT);
    let n1 = mesh_node(&mesh, NODE_1);
    n1.radio.fail_next_sends(1);

    let err = n1
        .transport
        .send(Some(NODE_2), TypeFlags::default(), b"x")
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.negated_code().is_some());
}
