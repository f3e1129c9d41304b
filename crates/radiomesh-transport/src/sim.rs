//! In-memory radios for tests and the soak daemon.
//!
//! `SimAir` is a shared medium for link radios: a frame sent to a registered
//! address is handed straight to that radio's receive callback, and the
//! sender's completion callback fires right after. `SimMesh` routes mesh
//! segments between node inboxes, with one node acting as root. Both offer
//! fault knobs (failed sends, lost frames, duplicated segments, low memory).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use radiomesh_core::{MacAddr, PeerEncryption, SegmentHeader, Wait};

use crate::radio::{Direction, LinkEvents, LinkRadio, MeshFrame, MeshRadio, RadioError, UpgradeWriter};

/// Generic primitive failure.
pub const ERR_FAIL: i32 = -1;
/// Link send to a peer that was never added.
pub const ERR_PEER_NOT_FOUND: i32 = 0x306a;
/// Mesh send to an address with no route.
pub const ERR_NO_ROUTE: i32 = 0x4008;
/// Mesh inbox torn down.
pub const ERR_DISCONNECTED: i32 = 0x4002;

// ── Link ──────────────────────────────────────────────────────────────────────

/// Shared medium connecting `SimLinkRadio`s by address.
#[derive(Clone, Default)]
pub struct SimAir {
    radios: Arc<DashMap<MacAddr, Weak<SimLinkRadio>>>,
}

impl SimAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a radio at `addr` and attach it to this medium.
    pub fn radio(&self, addr: MacAddr) -> Arc<SimLinkRadio> {
        let radio = Arc::new(SimLinkRadio {
            addr,
            air: self.clone(),
            events: RwLock::new(None),
            peers: DashMap::new(),
            fail_sends: AtomicU32::new(0),
            lose_frames: AtomicU32::new(0),
            silent: AtomicBool::new(false),
            frames_sent: AtomicUsize::new(0),
        });
        self.radios.insert(addr, Arc::downgrade(&radio));
        radio
    }

    fn lookup(&self, addr: &MacAddr) -> Option<Arc<SimLinkRadio>> {
        self.radios.get(addr).and_then(|w| w.upgrade())
    }
}

pub struct SimLinkRadio {
    addr: MacAddr,
    air: SimAir,
    events: RwLock<Option<Arc<dyn LinkEvents>>>,
    peers: DashMap<MacAddr, PeerEncryption>,
    fail_sends: AtomicU32,
    lose_frames: AtomicU32,
    silent: AtomicBool,
    frames_sent: AtomicUsize,
}

impl SimLinkRadio {
    fn handler(&self) -> Option<Arc<dyn LinkEvents>> {
        self.events.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reject the next `n` sends outright.
    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Accept the next `n` sends but report them undelivered.
    pub fn lose_next_frames(&self, n: u32) {
        self.lose_frames.store(n, Ordering::SeqCst);
    }

    /// Deliver frames but never report completion.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Push a raw frame into this radio's receive callback as if `from` sent it.
    pub fn inject(&self, from: MacAddr, frame: &[u8]) {
        if let Some(events) = self.handler() {
            events.on_receive(from, frame);
        }
    }

    pub fn has_peer(&self, addr: &MacAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn peer_encryption(&self, addr: &MacAddr) -> Option<PeerEncryption> {
        self.peers.get(addr).map(|e| *e.value())
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl LinkRadio for SimLinkRadio {
    fn local_addr(&self) -> MacAddr {
        self.addr
    }

    fn register(&self, events: Arc<dyn LinkEvents>) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = Some(events);
    }

    fn send(&self, peer: MacAddr, frame: &[u8]) -> Result<(), RadioError> {
        if take_one(&self.fail_sends) {
            return Err(RadioError::Code(ERR_FAIL));
        }
        if peer != MacAddr::BROADCAST && !self.peers.contains_key(&peer) {
            return Err(RadioError::Code(ERR_PEER_NOT_FOUND));
        }
        self.frames_sent.fetch_add(1, Ordering::SeqCst);

        let delivered = if take_one(&self.lose_frames) {
            false
        } else if peer == MacAddr::BROADCAST {
            for entry in self.air.radios.iter() {
                if *entry.key() == self.addr {
                    continue;
                }
                if let Some(radio) = entry.value().upgrade() {
                    radio.inject(self.addr, frame);
                }
            }
            true
        } else {
            match self.air.lookup(&peer) {
                Some(radio) => {
                    radio.inject(self.addr, frame);
                    true
                }
                None => false,
            }
        };

        if !self.silent.load(Ordering::SeqCst) {
            if let Some(events) = self.handler() {
                events.on_send_complete(peer, delivered);
            }
        }
        Ok(())
    }

    fn add_peer(&self, peer: MacAddr, encryption: PeerEncryption) -> Result<(), RadioError> {
        self.peers.insert(peer, encryption);
        Ok(())
    }

    fn remove_peer(&self, peer: MacAddr) -> Result<(), RadioError> {
        self.peers
            .remove(&peer)
            .map(|_| ())
            .ok_or(RadioError::Code(ERR_PEER_NOT_FOUND))
    }
}

// ── Mesh ──────────────────────────────────────────────────────────────────────

struct Inbox {
    tx: mpsc::UnboundedSender<MeshFrame>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MeshFrame>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    async fn recv(&self, wait: Wait) -> Result<MeshFrame, RadioError> {
        let deadline = wait.deadline();
        let mut rx = deadline.run(self.rx.lock()).await.ok_or(RadioError::Timeout)?;
        match deadline.run(rx.recv()).await {
            Some(Some(frame)) => Ok(frame),
            Some(None) => Err(RadioError::Code(ERR_DISCONNECTED)),
            None => Err(RadioError::Timeout),
        }
    }
}

struct NodeSlot {
    local: Inbox,
    to_ds: Inbox,
}

/// A simulated mesh: nodes by address, one of them root.
#[derive(Clone)]
pub struct SimMesh {
    nodes: Arc<DashMap<MacAddr, Arc<NodeSlot>>>,
    root: MacAddr,
}

impl SimMesh {
    pub fn new(root: MacAddr) -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
            root,
        }
    }

    pub fn root_addr(&self) -> MacAddr {
        self.root
    }

    /// Create a node radio at `addr`. The node whose address matches the
    /// mesh's root address acts as root.
    pub fn node(&self, addr: MacAddr) -> Arc<SimMeshRadio> {
        let slot = Arc::new(NodeSlot {
            local: Inbox::new(),
            to_ds: Inbox::new(),
        });
        self.nodes.insert(addr, slot.clone());
        Arc::new(SimMeshRadio {
            addr,
            mesh: self.clone(),
            slot,
            free_heap: AtomicUsize::new(usize::MAX),
            heap_checks: AtomicUsize::new(0),
            fail_sends: AtomicU32::new(0),
            duplicate: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn slot(&self, addr: &MacAddr) -> Option<Arc<NodeSlot>> {
        self.nodes.get(addr).map(|s| s.value().clone())
    }
}

pub struct SimMeshRadio {
    addr: MacAddr,
    mesh: SimMesh,
    slot: Arc<NodeSlot>,
    free_heap: AtomicUsize,
    heap_checks: AtomicUsize,
    fail_sends: AtomicU32,
    duplicate: AtomicBool,
    sent: Mutex<Vec<SegmentHeader>>,
}

impl SimMeshRadio {
    pub fn set_free_heap(&self, bytes: usize) {
        self.free_heap.store(bytes, Ordering::SeqCst);
    }

    /// How often the transport asked for free memory.
    pub fn heap_checks(&self) -> usize {
        self.heap_checks.load(Ordering::SeqCst)
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Deliver every segment twice, as a mesh retransmission would.
    pub fn set_duplicate(&self, on: bool) {
        self.duplicate.store(on, Ordering::SeqCst);
    }

    /// Headers of every segment this radio has sent, in order.
    pub fn sent_headers(&self) -> Vec<SegmentHeader> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a frame on this node's local inbox.
    pub fn inject(&self, frame: MeshFrame) {
        let _ = self.slot.local.tx.send(frame);
    }

    /// Queue a frame on this node's external-bound inbox.
    pub fn inject_to_ds(&self, frame: MeshFrame) {
        let _ = self.slot.to_ds.tx.send(frame);
    }
}

#[async_trait]
impl MeshRadio for SimMeshRadio {
    fn local_addr(&self) -> MacAddr {
        self.addr
    }

    fn is_root(&self) -> bool {
        self.addr == self.mesh.root
    }

    fn free_heap(&self) -> usize {
        self.heap_checks.fetch_add(1, Ordering::SeqCst);
        self.free_heap.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        dest: Option<MacAddr>,
        direction: Direction,
        header: &SegmentHeader,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        if take_one(&self.fail_sends) {
            return Err(RadioError::Code(ERR_FAIL));
        }

        // Metadata travels out of band as bytes; make it survive the trip.
        let header = header
            .encode()
            .and_then(|bytes| SegmentHeader::decode(&bytes))
            .map_err(|_| RadioError::Code(ERR_FAIL))?;

        let (slot, dest_addr) = match direction {
            Direction::ToDs => {
                let root = self
                    .mesh
                    .slot(&self.mesh.root)
                    .ok_or(RadioError::Code(ERR_NO_ROUTE))?;
                (root, dest.unwrap_or(MacAddr::ZERO))
            }
            Direction::Local | Direction::FromDs => {
                let to = dest.unwrap_or(self.mesh.root);
                (self.mesh.slot(&to).ok_or(RadioError::Code(ERR_NO_ROUTE))?, to)
            }
        };
        let inbox = match direction {
            Direction::ToDs => &slot.to_ds,
            _ => &slot.local,
        };

        let frame = MeshFrame {
            src: self.addr,
            dest: dest_addr,
            direction,
            header,
            payload: Bytes::copy_from_slice(payload),
        };
        let copies = if self.duplicate.load(Ordering::SeqCst) { 2 } else { 1 };
        for _ in 0..copies {
            inbox
                .tx
                .send(frame.clone())
                .map_err(|_| RadioError::Code(ERR_DISCONNECTED))?;
        }
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(header);
        Ok(())
    }

    async fn recv(&self, wait: Wait) -> Result<MeshFrame, RadioError> {
        self.slot.local.recv(wait).await
    }

    async fn recv_to_ds(&self, wait: Wait) -> Result<MeshFrame, RadioError> {
        self.slot.to_ds.recv(wait).await
    }
}

/// Upgrade writer that keeps every diverted segment in memory.
#[derive(Default)]
pub struct RecordingUpgradeWriter {
    segments: Mutex<Vec<(MacAddr, SegmentHeader, Bytes)>>,
}

impl RecordingUpgradeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> Vec<(MacAddr, SegmentHeader, Bytes)> {
        self.segments.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn bytes_written(&self) -> usize {
        self.segments().iter().map(|(_, _, p)| p.len()).sum()
    }
}

#[async_trait]
impl UpgradeWriter for RecordingUpgradeWriter {
    async fn write(
        &self,
        src: MacAddr,
        header: &SegmentHeader,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.segments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((src, *header, Bytes::copy_from_slice(payload)));
        Ok(())
    }
}
