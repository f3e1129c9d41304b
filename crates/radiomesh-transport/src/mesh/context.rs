//! Mesh state shared by the send and receive paths of one transport:
//! the packet id counter, the duplicate filter and the upgrade segment filter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use radiomesh_core::config::DedupPolicy;
use radiomesh_core::MacAddr;

pub struct MeshContext {
    next_packet_id: AtomicU32,
    dedup: Mutex<DedupFilter>,
    upgrade: Mutex<UpgradeFilter>,
}

impl MeshContext {
    /// Packet ids start at a random value so a rebooted node does not
    /// reuse the ids its previous incarnation just sent.
    pub fn new(policy: DedupPolicy) -> Self {
        Self::with_first_packet_id(policy, rand::random())
    }

    pub fn with_first_packet_id(policy: DedupPolicy, first: u32) -> Self {
        Self {
            next_packet_id: AtomicU32::new(first),
            dedup: Mutex::new(DedupFilter::new(policy)),
            upgrade: Mutex::new(UpgradeFilter::default()),
        }
    }

    /// Monotonically increasing, wrapping at u32::MAX.
    pub fn next_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_duplicate(&self, sender: MacAddr, packet_id: u32) -> bool {
        self.dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_duplicate(sender, packet_id)
    }

    pub fn record_complete(&self, sender: MacAddr, packet_id: u32) {
        self.dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(sender, packet_id);
    }

    /// False if this upgrade segment was already handed to the writer.
    pub fn accept_upgrade_segment(&self, sender: MacAddr, packet_id: u32, seq: u8) -> bool {
        self.upgrade
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accept(sender, packet_id, seq)
    }
}

/// Remembers the last completed packet id, globally or per sender.
#[derive(Debug)]
pub struct DedupFilter {
    policy: DedupPolicy,
    last_global: Option<u32>,
    last_by_sender: HashMap<MacAddr, u32>,
}

impl DedupFilter {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            last_global: None,
            last_by_sender: HashMap::new(),
        }
    }

    pub fn is_duplicate(&self, sender: MacAddr, packet_id: u32) -> bool {
        match self.policy {
            DedupPolicy::Global => self.last_global == Some(packet_id),
            DedupPolicy::PerSender => self.last_by_sender.get(&sender) == Some(&packet_id),
        }
    }

    pub fn record(&mut self, sender: MacAddr, packet_id: u32) {
        match self.policy {
            DedupPolicy::Global => self.last_global = Some(packet_id),
            DedupPolicy::PerSender => {
                self.last_by_sender.insert(sender, packet_id);
            }
        }
    }
}

/// Per sender, the upgrade packet in progress and which of its segments
/// have been seen.
#[derive(Debug, Default)]
pub struct UpgradeFilter {
    seen: HashMap<MacAddr, (u32, u64)>,
}

impl UpgradeFilter {
    pub fn accept(&mut self, sender: MacAddr, packet_id: u32, seq: u8) -> bool {
        // Sequence numbers past the bitmap are never reached by a valid
        // message; let them through untracked.
        let Some(bit) = 1u64.checked_shl(u32::from(seq)) else {
            return true;
        };
        match self.seen.get_mut(&sender) {
            Some((current, bits)) if *current == packet_id => {
                if *bits & bit != 0 {
                    return false;
                }
                *bits |= bit;
                true
            }
            _ => {
                self.seen.insert(sender, (packet_id, bit));
                true
            }
        }
    }
}
