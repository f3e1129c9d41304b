//! Radiomesh integration test harness.
//!
//! Every test drives the public transport API over the in-memory radios in
//! `radiomesh_transport::sim`, so nothing here needs hardware or privileges:
//!
//!   cargo test --test integration
//!
//! Each test builds its own `SimAir` / `SimMesh`; no state is shared.

use std::sync::Arc;

use radiomesh_core::config::{LinkConfig, MeshConfig, QueueCapacities};
use radiomesh_core::MacAddr;
use radiomesh_transport::sim::{SimAir, SimLinkRadio, SimMesh, SimMeshRadio};
use radiomesh_transport::{LinkTransport, MeshTransport};

mod link;
mod mesh;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PEER_A: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
pub const PEER_B: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

pub const ROOT: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);
pub const NODE_1: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x11]);
pub const NODE_2: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x12]);

/// A link endpoint plus the radio behind it, for fault injection.
pub struct LinkNode {
    pub transport: Arc<LinkTransport>,
    pub radio: Arc<SimLinkRadio>,
}

/// Two initialised link transports on one medium.
pub fn link_pair(config: LinkConfig) -> (LinkNode, LinkNode) {
    let air = SimAir::new();
    let node = |addr: MacAddr| {
        let radio = air.radio(addr);
        let transport = Arc::new(LinkTransport::new(radio.clone(), config.clone()));
        transport.init();
        LinkNode { transport, radio }
    };
    (node(PEER_A), node(PEER_B))
}

/// Link config whose bulk queue holds a maximum-size message.
pub fn roomy_link_config() -> LinkConfig {
    LinkConfig {
        max_message_size: usize::MAX,
        queue_capacity: QueueCapacities {
            bulk: 256,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct MeshNode {
    pub transport: MeshTransport,
    pub radio: Arc<SimMeshRadio>,
}

pub fn mesh_node(mesh: &SimMesh, addr: MacAddr) -> MeshNode {
    let radio = mesh.node(addr);
    MeshNode {
        transport: MeshTransport::new(radio.clone(), MeshConfig::default()),
        radio,
    }
}

/// Deterministic, non-repeating-looking test data.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}
