//! Radio primitives consumed by the transports.
//!
//! The radio stack owns PHY/MAC behaviour, channel selection, association
//! and ciphers. The transports only see what is declared here: a
//! point-to-point frame primitive with a small payload limit and an
//! asynchronous completion signal, and a mesh primitive that forwards
//! multi-hop but carries no framing of its own.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use radiomesh_core::{MacAddr, PeerEncryption, SegmentHeader, Wait};

/// Result of a radio primitive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("radio wait elapsed")]
    Timeout,

    #[error("radio error 0x{0:x}")]
    Code(i32),
}

// ── Point-to-point ────────────────────────────────────────────────────────────

/// Callbacks the link radio invokes from its receive / send-done context.
///
/// Implementations must not block: they run where the radio stack would run
/// an interrupt-level callback.
pub trait LinkEvents: Send + Sync {
    fn on_receive(&self, peer: MacAddr, frame: &[u8]);

    /// Completion for the most recent `send` to `peer`.
    fn on_send_complete(&self, peer: MacAddr, delivered: bool);
}

pub trait LinkRadio: Send + Sync {
    fn local_addr(&self) -> MacAddr;

    /// Attach the inbound handler. Replaces any previous one.
    fn register(&self, events: Arc<dyn LinkEvents>);

    /// Hand one frame to the radio. `Ok` means queued for transmission;
    /// delivery is reported later through `LinkEvents::on_send_complete`.
    fn send(&self, peer: MacAddr, frame: &[u8]) -> Result<(), RadioError>;

    fn add_peer(&self, peer: MacAddr, encryption: PeerEncryption) -> Result<(), RadioError>;

    fn remove_peer(&self, peer: MacAddr) -> Result<(), RadioError>;
}

// ── Mesh ──────────────────────────────────────────────────────────────────────

/// Directionality flag of the mesh primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Delivered inside the mesh.
    Local,
    /// Node towards the external network, bridged by the root.
    ToDs,
    /// External network towards a node, injected by the root.
    FromDs,
}

/// One segment as handed over by the mesh primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFrame {
    pub src: MacAddr,
    pub dest: MacAddr,
    pub direction: Direction,
    pub header: SegmentHeader,
    pub payload: Bytes,
}

#[async_trait]
pub trait MeshRadio: Send + Sync {
    fn local_addr(&self) -> MacAddr;

    fn is_root(&self) -> bool;

    /// Memory currently available to the radio stack, in bytes.
    fn free_heap(&self) -> usize;

    /// Blocking send of one segment. `dest` of `None` routes to the root.
    async fn send(
        &self,
        dest: Option<MacAddr>,
        direction: Direction,
        header: &SegmentHeader,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Next segment addressed to this node.
    async fn recv(&self, wait: Wait) -> Result<MeshFrame, RadioError>;

    /// Next segment bound for the external network. Root only.
    async fn recv_to_ds(&self, wait: Wait) -> Result<MeshFrame, RadioError>;
}

/// Sink for firmware-update segments diverted out of the mesh receive path.
#[async_trait]
pub trait UpgradeWriter: Send + Sync {
    async fn write(&self, src: MacAddr, header: &SegmentHeader, payload: &[u8])
        -> anyhow::Result<()>;
}
