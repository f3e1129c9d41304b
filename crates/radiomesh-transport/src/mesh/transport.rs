use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Mutex;

use radiomesh_core::config::MeshConfig;
use radiomesh_core::wire::{segment_count, MESH_MESSAGE_MAX, SEGMENT_PAYLOAD_MAX};
use radiomesh_core::{Deadline, MacAddr, SegmentHeader, TypeFlags, Wait};

use super::context::MeshContext;
use super::reassembly::{Reassembly, Rejected};
use crate::error::TransportError;
use crate::radio::{Direction, MeshFrame, MeshRadio, RadioError, UpgradeWriter};

/// A message returned by `recv` / `root_recv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMessage {
    /// Node the segments came from.
    pub src: MacAddr,
    pub dest: MacAddr,
    /// True origin for traffic that crossed the root, from the segment header.
    pub origin: Option<MacAddr>,
    pub packet_id: u32,
    pub flags: TypeFlags,
    pub data: Bytes,
    /// False when the deadline passed before the declared size was reached.
    pub complete: bool,
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub segments_sent: u64,
    pub send_failures: u64,
    pub memory_stalls: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub partial_receives: u64,
    pub duplicates_dropped: u64,
    pub segments_discarded: u64,
    pub messages_abandoned: u64,
    pub ota_segments: u64,
    pub ota_bytes: u64,
}

#[derive(Default)]
struct MeshCounters {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    segments_sent: AtomicU64,
    send_failures: AtomicU64,
    memory_stalls: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    partial_receives: AtomicU64,
    duplicates_dropped: AtomicU64,
    segments_discarded: AtomicU64,
    messages_abandoned: AtomicU64,
    ota_segments: AtomicU64,
    ota_bytes: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Which inbox of the primitive a receive loop drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbox {
    Local,
    External,
}

pub struct MeshTransport {
    radio: Arc<dyn MeshRadio>,
    context: Arc<MeshContext>,
    upgrade: Option<Arc<dyn UpgradeWriter>>,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
    root_recv_lock: Mutex<()>,
    config: MeshConfig,
    counters: MeshCounters,
}

impl MeshTransport {
    pub fn new(radio: Arc<dyn MeshRadio>, config: MeshConfig) -> Self {
        let context = Arc::new(MeshContext::new(config.dedup));
        Self::with_context(radio, config, context)
    }

    /// Build a transport over an existing context, e.g. one shared with a
    /// second transport instance on the same node.
    pub fn with_context(
        radio: Arc<dyn MeshRadio>,
        config: MeshConfig,
        context: Arc<MeshContext>,
    ) -> Self {
        Self {
            radio,
            context,
            upgrade: None,
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
            root_recv_lock: Mutex::new(()),
            config,
            counters: MeshCounters::default(),
        }
    }

    /// Route firmware-update segments to `writer` instead of dropping them.
    pub fn with_upgrade_writer(mut self, writer: Arc<dyn UpgradeWriter>) -> Self {
        self.upgrade = Some(writer);
        self
    }

    pub fn local_addr(&self) -> MacAddr {
        self.radio.local_addr()
    }

    pub fn is_root(&self) -> bool {
        self.radio.is_root()
    }

    pub fn context(&self) -> &Arc<MeshContext> {
        &self.context
    }

    // ── Send ──────────────────────────────────────────────────────────────────

    /// Send `data` inside the mesh. `dest` of `None` addresses the root.
    ///
    /// With `flags.to_server` set the message travels towards the external
    /// network and every segment carries this node's address as origin.
    /// Returns the number of bytes sent.
    pub async fn send(
        &self,
        dest: Option<MacAddr>,
        flags: TypeFlags,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let (direction, origin) = if flags.to_server {
            (Direction::ToDs, Some(self.local_addr()))
        } else {
            (Direction::Local, None)
        };
        self.send_segments(dest, direction, flags, origin, data).await
    }

    /// Root only: deliver a message from the external side to `dest`,
    /// keeping `origin` in every segment header.
    pub async fn root_send(
        &self,
        dest: MacAddr,
        origin: MacAddr,
        mut flags: TypeFlags,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        if !self.is_root() {
            return Err(TransportError::NotRoot);
        }
        // The origin field is only on the wire when to_server is set.
        flags.to_server = true;
        self.send_segments(Some(dest), Direction::FromDs, flags, Some(origin), data)
            .await
    }

    async fn send_segments(
        &self,
        dest: Option<MacAddr>,
        direction: Direction,
        flags: TypeFlags,
        origin: Option<MacAddr>,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        if data.is_empty() {
            return Err(TransportError::InvalidArgument("empty message"));
        }
        if data.len() > MESH_MESSAGE_MAX {
            return Err(TransportError::InvalidArgument("message exceeds mesh limit"));
        }
        if dest.is_some_and(|d| d.is_zero()) {
            return Err(TransportError::InvalidArgument("zero destination address"));
        }

        let _guard = self.send_lock.lock().await;
        let packet_id = self.context.next_packet_id();
        let total = segment_count(data.len());

        for (index, chunk) in data.chunks(SEGMENT_PAYLOAD_MAX).enumerate() {
            let header = SegmentHeader {
                seq: index as u8,
                total_size: data.len() as u16,
                packet_id,
                flags,
                origin,
            };
            self.wait_for_memory().await;

            if let Err(e) = self.radio.send(dest, direction, &header, chunk).await {
                bump(&self.counters.send_failures, 1);
                let err = TransportError::from(e);
                tracing::debug!(
                    dest = ?dest,
                    packet_id,
                    seq = index,
                    error = %err,
                    "mesh segment send failed"
                );
                return Err(err);
            }
            bump(&self.counters.segments_sent, 1);
            tracing::trace!(packet_id, seq = index, total, len = chunk.len(), "segment sent");
        }

        bump(&self.counters.messages_sent, 1);
        bump(&self.counters.bytes_sent, data.len() as u64);
        tracing::debug!(
            dest = ?dest,
            ?direction,
            packet_id,
            segments = total,
            len = data.len(),
            "mesh message sent"
        );
        Ok(data.len())
    }

    /// Hold off while the radio stack is short on memory. Gives up after the
    /// configured number of retries and lets the segment go out regardless.
    async fn wait_for_memory(&self) {
        let min = self.config.free_heap_min;
        let mut free = self.radio.free_heap();
        if free >= min {
            return;
        }
        bump(&self.counters.memory_stalls, 1);
        let mut retries = 0;
        while free < min && retries < self.config.heap_retry_limit {
            tokio::time::sleep(self.config.heap_retry_delay()).await;
            retries += 1;
            free = self.radio.free_heap();
        }
        if free < min {
            tracing::warn!(free, min, retries, "free memory still low, sending anyway");
        }
    }

    // ── Receive ───────────────────────────────────────────────────────────────

    /// Reassemble the next message addressed to this node.
    ///
    /// Returns `Timeout` if nothing arrived; a message cut short by the
    /// deadline comes back with `complete == false`.
    pub async fn recv(&self, wait: Wait) -> Result<MeshMessage, TransportError> {
        self.receive(Inbox::Local, wait)
            .await?
            .ok_or(TransportError::Timeout)
    }

    /// Root only: reassemble the next message bound for the external network.
    ///
    /// `Ok(None)` means the wait elapsed with nothing received, so a bridge
    /// loop can keep calling without treating silence as an error.
    pub async fn root_recv(&self, wait: Wait) -> Result<Option<MeshMessage>, TransportError> {
        if !self.is_root() {
            return Err(TransportError::NotRoot);
        }
        self.receive(Inbox::External, wait).await
    }

    async fn receive(
        &self,
        inbox: Inbox,
        wait: Wait,
    ) -> Result<Option<MeshMessage>, TransportError> {
        let deadline = wait.deadline();
        let lock = match inbox {
            Inbox::Local => &self.recv_lock,
            Inbox::External => &self.root_recv_lock,
        };
        let Some(_guard) = deadline.run(lock.lock()).await else {
            return Ok(None);
        };

        let mut acc: Option<Reassembly> = None;
        loop {
            let frame = match self.next_frame(inbox, &deadline).await {
                Ok(frame) => frame,
                Err(RadioError::Timeout) => return Ok(acc.map(|a| self.finish(a))),
                Err(RadioError::Code(code)) => {
                    tracing::warn!(code, ?inbox, "mesh receive failed");
                    return Err(TransportError::Link(code));
                }
            };

            if frame.header.flags.ota {
                self.divert_upgrade(&frame).await;
                continue;
            }

            let sender = frame.header.origin.unwrap_or(frame.src);
            let packet_id = frame.header.packet_id;
            if self.context.is_duplicate(sender, packet_id) {
                bump(&self.counters.duplicates_dropped, 1);
                tracing::debug!(%sender, packet_id, "duplicate segment dropped");
                continue;
            }
            if frame.header.total_size == 0 {
                bump(&self.counters.segments_discarded, 1);
                tracing::debug!(%sender, packet_id, "segment with zero total size dropped");
                continue;
            }

            let restart = match &acc {
                Some(current) => !current.belongs(sender, &frame),
                None => true,
            };
            if restart {
                if let Some(old) = acc.take() {
                    bump(&self.counters.messages_abandoned, 1);
                    tracing::debug!(
                        sender = %old.sender,
                        packet_id = old.first.header.packet_id,
                        received = old.received(),
                        total = old.total(),
                        "partial message abandoned"
                    );
                }
                acc = Some(Reassembly::start(sender, &frame));
            }
            let Some(current) = acc.as_mut() else {
                continue;
            };

            match current.insert(frame.header.seq, &frame.payload) {
                Ok(()) => {
                    tracing::trace!(
                        %sender,
                        packet_id,
                        seq = frame.header.seq,
                        received = current.received(),
                        total = current.total(),
                        "segment accepted"
                    );
                }
                Err(Rejected::Repeat) => {
                    bump(&self.counters.duplicates_dropped, 1);
                    tracing::debug!(%sender, packet_id, seq = frame.header.seq, "repeated segment dropped");
                }
                Err(Rejected::OutOfBounds) => {
                    bump(&self.counters.segments_discarded, 1);
                    tracing::debug!(
                        %sender,
                        packet_id,
                        seq = frame.header.seq,
                        len = frame.payload.len(),
                        "segment outside declared size dropped"
                    );
                }
            }

            if current.is_complete() {
                if let Some(done) = acc.take() {
                    self.context.record_complete(done.sender, packet_id);
                    return Ok(Some(self.finish(done)));
                }
            }
        }
    }

    async fn next_frame(&self, inbox: Inbox, deadline: &Deadline) -> Result<MeshFrame, RadioError> {
        let wait = deadline.remaining();
        match inbox {
            Inbox::Local => self.radio.recv(wait).await,
            Inbox::External => self.radio.recv_to_ds(wait).await,
        }
    }

    async fn divert_upgrade(&self, frame: &MeshFrame) {
        let sender = frame.header.origin.unwrap_or(frame.src);
        let (packet_id, seq) = (frame.header.packet_id, frame.header.seq);
        if !self.context.accept_upgrade_segment(sender, packet_id, seq) {
            bump(&self.counters.duplicates_dropped, 1);
            tracing::debug!(%sender, packet_id, seq, "repeated upgrade segment dropped");
            return;
        }
        bump(&self.counters.ota_segments, 1);
        bump(&self.counters.ota_bytes, frame.payload.len() as u64);
        let Some(writer) = &self.upgrade else {
            tracing::warn!(
                src = %frame.src,
                packet_id = frame.header.packet_id,
                "upgrade segment dropped, no writer attached"
            );
            return;
        };
        if let Err(e) = writer.write(frame.src, &frame.header, &frame.payload).await {
            tracing::warn!(
                src = %frame.src,
                packet_id = frame.header.packet_id,
                seq = frame.header.seq,
                error = %e,
                "upgrade writer failed"
            );
        }
    }

    fn finish(&self, acc: Reassembly) -> MeshMessage {
        let complete = acc.is_complete();
        let first = acc.first.clone();
        let data = acc.into_data();
        if complete {
            bump(&self.counters.messages_received, 1);
            bump(&self.counters.bytes_received, data.len() as u64);
            tracing::debug!(
                src = %first.src,
                packet_id = first.header.packet_id,
                len = data.len(),
                "mesh message received"
            );
        } else {
            bump(&self.counters.partial_receives, 1);
            tracing::debug!(
                src = %first.src,
                packet_id = first.header.packet_id,
                len = data.len(),
                total = first.header.total_size,
                "mesh receive ended short"
            );
        }
        MeshMessage {
            src: first.src,
            dest: first.dest,
            origin: first.header.origin,
            packet_id: first.header.packet_id,
            flags: first.header.flags,
            data,
            complete,
        }
    }

    pub fn stats(&self) -> MeshStats {
        let c = &self.counters;
        let get = |a: &AtomicU64| a.load(Ordering::Relaxed);
        MeshStats {
            messages_sent: get(&c.messages_sent),
            bytes_sent: get(&c.bytes_sent),
            segments_sent: get(&c.segments_sent),
            send_failures: get(&c.send_failures),
            memory_stalls: get(&c.memory_stalls),
            messages_received: get(&c.messages_received),
            bytes_received: get(&c.bytes_received),
            partial_receives: get(&c.partial_receives),
            duplicates_dropped: get(&c.duplicates_dropped),
            segments_discarded: get(&c.segments_discarded),
            messages_abandoned: get(&c.messages_abandoned),
            ota_segments: get(&c.ota_segments),
            ota_bytes: get(&c.ota_bytes),
        }
    }
}
