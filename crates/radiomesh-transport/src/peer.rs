//! Peer table: which link peers the radio currently knows, and how frames
//! to them are protected.

use std::sync::Arc;

use dashmap::DashMap;

use radiomesh_core::{MacAddr, PeerEncryption};

use crate::error::TransportError;
use crate::radio::LinkRadio;

/// Shared between the link transport and its consumers. Every mutation goes
/// through the radio first so the table never claims a peer the radio lacks.
#[derive(Clone)]
pub struct PeerTable {
    radio: Arc<dyn LinkRadio>,
    peers: Arc<DashMap<MacAddr, PeerEncryption>>,
}

impl PeerTable {
    pub fn new(radio: Arc<dyn LinkRadio>) -> Self {
        Self {
            radio,
            peers: Arc::new(DashMap::new()),
        }
    }

    /// Register a peer, or change its encryption policy if already known.
    pub fn add(&self, addr: MacAddr, encryption: PeerEncryption) -> Result<(), TransportError> {
        if addr.is_zero() {
            return Err(TransportError::InvalidArgument("zero peer address"));
        }
        match self.peers.get(&addr).map(|e| *e.value()) {
            Some(current) if current == encryption => return Ok(()),
            Some(_) => self.radio.remove_peer(addr)?,
            None => {}
        }
        if let Err(e) = self.radio.add_peer(addr, encryption) {
            self.peers.remove(&addr);
            return Err(e.into());
        }
        self.peers.insert(addr, encryption);
        tracing::debug!(
            peer = %addr,
            encrypted = encryption.is_encrypted(),
            "peer registered"
        );
        Ok(())
    }

    /// Forget a peer. Returns false if it was not registered.
    pub fn remove(&self, addr: MacAddr) -> Result<bool, TransportError> {
        if !self.peers.contains_key(&addr) {
            return Ok(false);
        }
        self.radio.remove_peer(addr)?;
        self.peers.remove(&addr);
        tracing::debug!(peer = %addr, "peer removed");
        Ok(true)
    }

    pub fn contains(&self, addr: &MacAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn encryption(&self, addr: &MacAddr) -> Option<PeerEncryption> {
        self.peers.get(addr).map(|e| *e.value())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
