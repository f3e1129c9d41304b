//! Accumulator for one mesh message.

use bytes::Bytes;

use radiomesh_core::wire::SEGMENT_PAYLOAD_MAX;
use radiomesh_core::MacAddr;

use crate::radio::MeshFrame;

/// Why a segment was not accepted into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// Same seq already stored.
    Repeat,
    /// Seq/length do not fit the declared total size.
    OutOfBounds,
}

pub(crate) struct Reassembly {
    pub sender: MacAddr,
    pub first: MeshFrame,
    buf: Vec<u8>,
    received: usize,
    /// One bit per seq. A message has at most 46 segments.
    seen: u64,
}

impl Reassembly {
    pub fn start(sender: MacAddr, first: &MeshFrame) -> Self {
        let total = first.header.total_size as usize;
        Self {
            sender,
            first: first.clone(),
            buf: vec![0u8; total],
            received: 0,
            seen: 0,
        }
    }

    pub fn belongs(&self, sender: MacAddr, frame: &MeshFrame) -> bool {
        self.sender == sender
            && self.first.header.packet_id == frame.header.packet_id
            && self.first.header.total_size == frame.header.total_size
    }

    pub fn insert(&mut self, seq: u8, payload: &[u8]) -> Result<(), Rejected> {
        if seq >= 64 {
            return Err(Rejected::OutOfBounds);
        }
        let bit = 1u64 << seq;
        if self.seen & bit != 0 {
            return Err(Rejected::Repeat);
        }
        let offset = seq as usize * SEGMENT_PAYLOAD_MAX;
        let end = offset + payload.len();
        if payload.len() > SEGMENT_PAYLOAD_MAX || end > self.buf.len() {
            return Err(Rejected::OutOfBounds);
        }
        self.buf[offset..end].copy_from_slice(payload);
        self.seen |= bit;
        self.received += payload.len();
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.buf.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn total(&self) -> usize {
        self.buf.len()
    }

    /// Bytes covered by segments 0..k with no gap.
    fn contiguous_len(&self) -> usize {
        let mut len = 0;
        let mut seq = 0u32;
        while seq < 64 && self.seen & (1u64 << seq) != 0 {
            len = ((seq as usize + 1) * SEGMENT_PAYLOAD_MAX).min(self.buf.len());
            seq += 1;
        }
        len
    }

    /// Finished data, or the gap-free prefix of a partial message.
    pub fn into_data(mut self) -> Bytes {
        if !self.is_complete() {
            let len = self.contiguous_len();
            self.buf.truncate(len);
        }
        Bytes::from(self.buf)
    }
}
