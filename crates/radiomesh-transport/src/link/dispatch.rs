//! Inbound dispatch and send completion, driven from the radio's callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use radiomesh_core::wire::decode_fragment;
use radiomesh_core::{LinkClass, MacAddr};

use crate::queue::{EvictingQueue, Push};
use crate::radio::LinkEvents;

/// One parsed inbound frame, as held in a class queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Address the radio reported the frame from.
    pub src: MacAddr,
    /// Address embedded in the header. Zero except on first fragments.
    pub addr: MacAddr,
    pub remaining: u8,
    pub payload: Bytes,
}

/// Queue plus reader lock for one enabled class.
pub(crate) struct ClassChannel {
    pub queue: EvictingQueue<Fragment>,
    /// Serializes readers so two reads never split one message. Holds a first
    /// fragment that ended the previous read early.
    pub reader: tokio::sync::Mutex<Option<Fragment>>,
}

#[derive(Default)]
pub(crate) struct LinkCounters {
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub short_reads: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub fragments_evicted: AtomicU64,
}

pub(crate) struct LinkDispatcher {
    channels: DashMap<LinkClass, Arc<ClassChannel>>,
    /// One-shot completion per outstanding send, keyed by peer.
    pending: DashMap<MacAddr, oneshot::Sender<bool>>,
    pub counters: LinkCounters,
}

impl LinkDispatcher {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            pending: DashMap::new(),
            counters: LinkCounters::default(),
        }
    }

    pub fn channel(&self, class: LinkClass) -> Option<Arc<ClassChannel>> {
        self.channels.get(&class).map(|c| c.value().clone())
    }

    /// Returns false if the class was already enabled.
    pub fn open(&self, class: LinkClass, capacity: usize) -> bool {
        let mut created = false;
        self.channels.entry(class).or_insert_with(|| {
            created = true;
            Arc::new(ClassChannel {
                queue: EvictingQueue::new(capacity),
                reader: tokio::sync::Mutex::new(None),
            })
        });
        created
    }

    /// Remove the class and drop anything queued. `None` if it was not enabled.
    pub fn close(&self, class: LinkClass) -> Option<usize> {
        self.channels
            .remove(&class)
            .map(|(_, channel)| channel.queue.close())
    }

    /// Arm a completion for the next send to `peer`.
    pub fn expect_completion(&self, peer: MacAddr) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(peer, tx);
        rx
    }

    pub fn cancel_completion(&self, peer: &MacAddr) {
        self.pending.remove(peer);
    }
}

impl LinkEvents for LinkDispatcher {
    fn on_receive(&self, peer: MacAddr, frame: &[u8]) {
        let view = match decode_fragment(frame) {
            Ok(view) => view,
            Err(e) => {
                self.counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%peer, error = %e, len = frame.len(), "discarding link frame");
                return;
            }
        };

        let Some(channel) = self.channel(view.class) else {
            self.counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%peer, class = ?view.class, "class not enabled, dropping fragment");
            return;
        };

        let fragment = Fragment {
            src: peer,
            addr: view.addr,
            remaining: view.remaining,
            payload: Bytes::copy_from_slice(view.payload),
        };
        tracing::trace!(
            %peer,
            class = ?view.class,
            remaining = view.remaining,
            len = view.payload.len(),
            "fragment queued"
        );

        match channel.queue.push(fragment) {
            Push::Queued => {}
            Push::Evicted(old) => {
                self.counters.fragments_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    class = ?view.class,
                    evicted_from = %old.src,
                    capacity = channel.queue.capacity(),
                    "class queue full, evicted oldest fragment"
                );
            }
            Push::Closed(_) => {
                tracing::trace!(class = ?view.class, "class disabled while dispatching");
            }
        }
    }

    fn on_send_complete(&self, peer: MacAddr, delivered: bool) {
        match self.pending.remove(&peer) {
            Some((_, tx)) => {
                let _ = tx.send(delivered);
            }
            None => tracing::trace!(%peer, delivered, "unsolicited send completion"),
        }
    }
}
