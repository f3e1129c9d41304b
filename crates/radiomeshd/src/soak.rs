//! Loopback soak over `SimAir` / `SimMesh`.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;

use radiomesh_core::config::RadiomeshConfig;
use radiomesh_core::{LinkClass, MacAddr, TypeFlags, Wait};
use radiomesh_transport::sim::{RecordingUpgradeWriter, SimAir, SimMesh};
use radiomesh_transport::{LinkStats, LinkTransport, MeshStats, MeshTransport};

const LINK_A: MacAddr = MacAddr([0x02, 0x52, 0x4d, 0, 0, 0x0a]);
const LINK_B: MacAddr = MacAddr([0x02, 0x52, 0x4d, 0, 0, 0x0b]);
const ROOT: MacAddr = MacAddr([0x02, 0x52, 0x4d, 0, 1, 0x00]);
const EXTERNAL: MacAddr = MacAddr([0x06, 0xe7, 0, 0, 0, 0x01]);
const MESH_NODES: u8 = 4;

const WAIT: Wait = Wait::Within(std::time::Duration::from_secs(2));

#[derive(Debug, Clone, Copy)]
pub struct SoakPlan {
    pub link: bool,
    pub mesh: bool,
    pub rounds: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct SoakReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshReport>,
}

#[derive(Debug, Serialize)]
pub struct LinkReport {
    pub rounds: usize,
    pub mismatches: usize,
    pub sender: LinkStats,
    pub receiver: LinkStats,
}

#[derive(Debug, Serialize)]
pub struct MeshReport {
    pub rounds: usize,
    pub mismatches: usize,
    pub root: MeshStats,
    pub nodes: Vec<MeshStats>,
    pub upgrade_bytes: usize,
}

impl SoakReport {
    pub fn failures(&self) -> usize {
        self.link.as_ref().map_or(0, |l| l.mismatches) + self.mesh.as_ref().map_or(0, |m| m.mismatches)
    }
}

pub async fn run(config: &RadiomeshConfig, plan: SoakPlan) -> Result<SoakReport> {
    let mut report = SoakReport::default();
    if plan.link {
        report.link = Some(link_soak(config, plan.rounds).await?);
    }
    if plan.mesh {
        report.mesh = Some(mesh_soak(config, plan.rounds).await?);
    }
    Ok(report)
}

fn random_payload(rng: &mut impl Rng, max: usize) -> Vec<u8> {
    let len = rng.gen_range(1..=max);
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    data
}

// ── Link ──────────────────────────────────────────────────────────────────────

async fn link_soak(config: &RadiomeshConfig, rounds: usize) -> Result<LinkReport> {
    let air = SimAir::new();
    let a = LinkTransport::new(air.radio(LINK_A), config.link.clone());
    let b = Arc::new(LinkTransport::new(air.radio(LINK_B), config.link.clone()));
    a.init();
    b.init();
    for class in LinkClass::ALL {
        b.enable(class)?;
    }

    // A message must fit in its class queue or the reader loses fragments.
    let max_len = |class: LinkClass| {
        let cap = config.link.queue_capacity.for_class(class);
        (cap * radiomesh_core::wire::FRAGMENT_PAYLOAD_MAX).min(config.link.message_limit())
    };

    let mut mismatches = 0;
    let mut rng = rand::thread_rng();
    for round in 0..rounds {
        let class = LinkClass::ALL[rng.gen_range(0..LinkClass::ALL.len())];
        let data = random_payload(&mut rng, max_len(class));

        let reader = {
            let b = b.clone();
            tokio::spawn(async move { b.read(class, WAIT).await })
        };
        a.write(class, LINK_B, &data, WAIT)
            .await
            .with_context(|| format!("link write failed in round {round}"))?;
        let msg = reader.await??;

        if !msg.complete || msg.peer != LINK_A || msg.data[..] != data[..] {
            mismatches += 1;
            tracing::warn!(round, ?class, len = data.len(), got = msg.data.len(), "link round mismatch");
        } else {
            tracing::debug!(round, ?class, len = data.len(), "link round ok");
        }
    }

    for class in LinkClass::ALL {
        b.disable(class)?;
    }
    tracing::info!(rounds, mismatches, "link soak finished");
    Ok(LinkReport {
        rounds,
        mismatches,
        sender: a.stats(),
        receiver: b.stats(),
    })
}

// ── Mesh ──────────────────────────────────────────────────────────────────────

async fn mesh_soak(config: &RadiomeshConfig, rounds: usize) -> Result<MeshReport> {
    let mesh = SimMesh::new(ROOT);
    let writer = Arc::new(RecordingUpgradeWriter::new());
    let root = MeshTransport::new(mesh.node(ROOT), config.mesh.clone());
    let nodes: Vec<(MacAddr, MeshTransport)> = (1..=MESH_NODES)
        .map(|i| {
            let addr = MacAddr([0x02, 0x52, 0x4d, 0, 1, i]);
            let transport = MeshTransport::new(mesh.node(addr), config.mesh.clone())
                .with_upgrade_writer(writer.clone());
            (addr, transport)
        })
        .collect();

    let upward = TypeFlags {
        to_server: true,
        ..Default::default()
    };
    let ota = TypeFlags {
        ota: true,
        ..Default::default()
    };

    let mut mismatches = 0;
    let mut rng = rand::thread_rng();
    for round in 0..rounds {
        let (addr, node) = &nodes[round % nodes.len()];

        // Node to external network, bridged by the root.
        let data = random_payload(&mut rng, 8 * 1024);
        node.send(None, upward, &data).await?;
        match root.root_recv(WAIT).await? {
            Some(msg) if msg.complete && msg.origin == Some(*addr) && msg.data[..] == data[..] => {}
            other => {
                mismatches += 1;
                tracing::warn!(round, node = %addr, received = other.is_some(), "upward round mismatch");
            }
        }

        // External network back to the node.
        // Every fourth round, an upgrade chunk shares the channel.
        if round % 4 == 0 {
            root.send(Some(*addr), ota, &random_payload(&mut rng, 1024)).await?;
        }
        let reply = random_payload(&mut rng, 8 * 1024);
        root.root_send(*addr, EXTERNAL, TypeFlags::default(), &reply).await?;
        match node.recv(WAIT).await {
            Ok(msg) if msg.complete && msg.origin == Some(EXTERNAL) && msg.data[..] == reply[..] => {}
            other => {
                mismatches += 1;
                tracing::warn!(round, node = %addr, result = ?other.map(|m| m.data.len()), "downward round mismatch");
            }
        }
    }

    tracing::info!(rounds, mismatches, upgrade_bytes = writer.bytes_written(), "mesh soak finished");
    Ok(MeshReport {
        rounds,
        mismatches,
        root: root.stats(),
        nodes: nodes.iter().map(|(_, n)| n.stats()).collect(),
        upgrade_bytes: writer.bytes_written(),
    })
}
