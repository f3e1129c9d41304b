use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::sync::Mutex;

use radiomesh_core::config::LinkConfig;
use radiomesh_core::wire::{encode_fragment, fragment_count, FRAGMENT_PAYLOAD_MAX};
use radiomesh_core::{Deadline, LinkClass, MacAddr, Wait};

use super::dispatch::{ClassChannel, Fragment, LinkDispatcher};
use crate::error::TransportError;
use crate::peer::PeerTable;
use crate::radio::LinkRadio;

/// A message reassembled by `LinkTransport::read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    /// Sender, as announced by the first fragment.
    pub peer: MacAddr,
    pub class: LinkClass,
    pub data: Bytes,
    /// False when the deadline passed before every announced fragment arrived.
    pub complete: bool,
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub short_reads: u64,
    pub frames_discarded: u64,
    pub fragments_evicted: u64,
}

pub struct LinkTransport {
    radio: Arc<dyn LinkRadio>,
    dispatcher: Arc<LinkDispatcher>,
    peers: PeerTable,
    /// Shared by all classes so fragments of different messages never interleave.
    send_lock: Mutex<()>,
    initialized: AtomicBool,
    config: LinkConfig,
}

impl LinkTransport {
    pub fn new(radio: Arc<dyn LinkRadio>, config: LinkConfig) -> Self {
        Self {
            peers: PeerTable::new(radio.clone()),
            radio,
            dispatcher: Arc::new(LinkDispatcher::new()),
            send_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            config,
        }
    }

    /// Attach the inbound handler to the radio. Idempotent.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.radio.register(self.dispatcher.clone());
        tracing::info!(addr = %self.radio.local_addr(), "link transport initialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<(), TransportError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }

    pub fn local_addr(&self) -> MacAddr {
        self.radio.local_addr()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Start queueing inbound fragments of `class`. Idempotent.
    pub fn enable(&self, class: LinkClass) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        let capacity = self.config.queue_capacity.for_class(class);
        if self.dispatcher.open(class, capacity) {
            tracing::info!(?class, capacity, "link class enabled");
        }
        Ok(())
    }

    /// Stop queueing `class` and free whatever is still queued. Idempotent.
    pub fn disable(&self, class: LinkClass) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        if let Some(dropped) = self.dispatcher.close(class) {
            tracing::info!(?class, dropped, "link class disabled");
        }
        Ok(())
    }

    pub fn is_enabled(&self, class: LinkClass) -> bool {
        self.dispatcher.channel(class).is_some()
    }

    /// Send `data` to `peer` as one message of `class`.
    ///
    /// Each fragment waits for the radio's completion before the next one
    /// goes out. The first failure aborts the write; nothing is retried.
    /// `wait` bounds the whole call including the wait for the send lock.
    pub async fn write(
        &self,
        class: LinkClass,
        peer: MacAddr,
        data: &[u8],
        wait: Wait,
    ) -> Result<usize, TransportError> {
        self.ensure_initialized()?;
        if data.is_empty() {
            return Err(TransportError::InvalidArgument("empty message"));
        }
        if data.len() > self.config.message_limit() {
            return Err(TransportError::InvalidArgument("message exceeds link limit"));
        }
        if peer.is_zero() {
            return Err(TransportError::InvalidArgument("zero peer address"));
        }

        let deadline = wait.deadline();
        let _guard = deadline
            .run(self.send_lock.lock())
            .await
            .ok_or(TransportError::Timeout)?;

        let temporary = peer != MacAddr::BROADCAST && !self.peers.contains(&peer);
        if temporary {
            self.peers.add(peer, self.config.encryption)?;
        }

        let result = self.send_fragments(class, peer, data, &deadline).await;

        if temporary {
            if let Err(e) = self.peers.remove(peer) {
                tracing::warn!(%peer, error = %e, "failed to remove temporary peer");
            }
        }

        let counters = &self.dispatcher.counters;
        match &result {
            Ok(()) => {
                counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                counters.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
                tracing::debug!(%peer, ?class, len = data.len(), "link message sent");
            }
            Err(e) => {
                counters.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%peer, ?class, error = %e, "link write failed");
            }
        }
        result.map(|()| data.len())
    }

    async fn send_fragments(
        &self,
        class: LinkClass,
        peer: MacAddr,
        data: &[u8],
        deadline: &Deadline,
    ) -> Result<(), TransportError> {
        let total = fragment_count(data.len());
        let local = self.local_addr();

        for (index, chunk) in data.chunks(FRAGMENT_PAYLOAD_MAX).enumerate() {
            let remaining = (total - 1 - index) as u8;
            let addr = if index == 0 { local } else { MacAddr::ZERO };
            let frame = encode_fragment(addr, class, remaining, chunk)?;

            let completion = self.dispatcher.expect_completion(peer);
            if let Err(e) = self.radio.send(peer, &frame) {
                self.dispatcher.cancel_completion(&peer);
                return Err(e.into());
            }

            let limit = deadline.capped(self.config.send_timeout());
            match limit.run(completion).await {
                Some(Ok(true)) => {
                    tracing::trace!(%peer, index, remaining, len = chunk.len(), "fragment confirmed");
                }
                Some(Ok(false)) | Some(Err(_)) => {
                    return Err(TransportError::SendFailed { peer });
                }
                None => {
                    self.dispatcher.cancel_completion(&peer);
                    return Err(TransportError::Timeout);
                }
            }
        }
        Ok(())
    }

    /// Reassemble the next message of `class`.
    ///
    /// Blocks until a first fragment arrives, then keeps pulling until the
    /// number of fragments it announced have been consumed. If `wait` runs
    /// out mid-message the partial data is returned with `complete == false`;
    /// if no fragment arrived at all the result is `Timeout`.
    ///
    /// Continuations with no first fragment in front of them (their head was
    /// evicted, or they trail a short read) are discarded. A first fragment
    /// arriving mid-message ends the current message short and is kept for
    /// the next read.
    pub async fn read(&self, class: LinkClass, wait: Wait) -> Result<LinkMessage, TransportError> {
        self.ensure_initialized()?;
        let channel = self
            .dispatcher
            .channel(class)
            .ok_or(TransportError::ClassDisabled(class))?;

        let deadline = wait.deadline();
        let mut carried = deadline
            .run(channel.reader.lock())
            .await
            .ok_or(TransportError::Timeout)?;

        let first = match carried.take() {
            Some(first) => first,
            None => self.next_first_fragment(&channel, class, &deadline).await?,
        };

        let announced = first.remaining as usize;
        let peer = first.addr;
        let mut data = BytesMut::with_capacity((announced + 1) * FRAGMENT_PAYLOAD_MAX);
        data.extend_from_slice(&first.payload);

        let mut consumed = 0;
        while consumed < announced {
            match channel.queue.pop(&deadline).await {
                Some(fragment) if !fragment.addr.is_zero() => {
                    tracing::debug!(
                        %peer,
                        ?class,
                        next = %fragment.addr,
                        "new message started before the current one finished"
                    );
                    *carried = Some(fragment);
                    break;
                }
                Some(fragment) => {
                    data.extend_from_slice(&fragment.payload);
                    consumed += 1;
                }
                None => break,
            }
        }

        let complete = consumed == announced;
        let counters = &self.dispatcher.counters;
        if complete {
            counters.messages_received.fetch_add(1, Ordering::Relaxed);
            counters.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
            tracing::debug!(%peer, ?class, len = data.len(), "link message received");
        } else {
            counters.short_reads.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                %peer,
                ?class,
                got = consumed + 1,
                expected = announced + 1,
                "link read ended short"
            );
        }

        Ok(LinkMessage {
            peer,
            class,
            data: data.freeze(),
            complete,
        })
    }

    /// Pop until a fragment carrying a sender address shows up.
    async fn next_first_fragment(
        &self,
        channel: &ClassChannel,
        class: LinkClass,
        deadline: &Deadline,
    ) -> Result<Fragment, TransportError> {
        loop {
            let Some(fragment) = channel.queue.pop(deadline).await else {
                if channel.queue.is_closed() {
                    return Err(TransportError::ClassDisabled(class));
                }
                return Err(TransportError::Timeout);
            };
            if !fragment.addr.is_zero() {
                return Ok(fragment);
            }
            self.dispatcher
                .counters
                .frames_discarded
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                src = %fragment.src,
                ?class,
                remaining = fragment.remaining,
                "continuation without a first fragment, discarding"
            );
        }
    }

    pub fn stats(&self) -> LinkStats {
        let c = &self.dispatcher.counters;
        LinkStats {
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            short_reads: c.short_reads.load(Ordering::Relaxed),
            frames_discarded: c.frames_discarded.load(Ordering::Relaxed),
            fragments_evicted: c.fragments_evicted.load(Ordering::Relaxed),
        }
    }
}
