//! Radiomesh wire format: the only bytes that cross the radio.
//!
//! Two layouts live here:
//!
//!   * the point-to-point fragment header, carried in-band in front of every
//!     link frame;
//!   * the mesh segment header, carried out-of-band alongside every mesh
//!     payload chunk.
//!
//! Every field and size is part of the protocol. Changing anything here is a
//! breaking change for every node on the air. Multi-byte integers are
//! little-endian. There is no unsafe code in this module.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Addresses ─────────────────────────────────────────────────────────────────

/// 6-byte station address, used both for link peers and mesh nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0u8; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| WireError::BadAddress(s.to_string()))?;
            let decoded =
                hex::decode(part).map_err(|_| WireError::BadAddress(s.to_string()))?;
            if decoded.len() != 1 {
                return Err(WireError::BadAddress(s.to_string()));
            }
            *byte = decoded[0];
        }
        if parts.next().is_some() {
            return Err(WireError::BadAddress(s.to_string()));
        }
        Ok(MacAddr(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Link classes ──────────────────────────────────────────────────────────────

/// Multiplexing tag partitioning point-to-point traffic into independent
/// queues. The numeric value is the class byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LinkClass {
    /// Log and debug relay.
    Debug = 0x00,
    /// Device control commands.
    Control = 0x01,
    /// Network configuration / provisioning exchange.
    Provision = 0x02,
    /// Bulk payloads. Gets the deepest queue.
    Bulk = 0x03,
}

impl LinkClass {
    pub const ALL: [LinkClass; 4] = [
        LinkClass::Debug,
        LinkClass::Control,
        LinkClass::Provision,
        LinkClass::Bulk,
    ];
}

impl TryFrom<u8> for LinkClass {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(LinkClass::Debug),
            0x01 => Ok(LinkClass::Control),
            0x02 => Ok(LinkClass::Provision),
            0x03 => Ok(LinkClass::Bulk),
            other => Err(WireError::UnknownClass(other)),
        }
    }
}

impl From<LinkClass> for u8 {
    fn from(c: LinkClass) -> u8 {
        c as u8
    }
}

// ── Fragment Header ───────────────────────────────────────────────────────────

/// Header in front of every point-to-point frame.
///
/// `addr` is the sender's address on the first fragment of a message and all
/// zeroes on the rest. `remaining` counts the fragments that still follow;
/// the first fragment's value is authoritative for reassembly.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FragmentHeader {
    /// Fixed tag filtering out foreign traffic on the shared medium.
    pub tag: [u8; 3],
    pub addr: [u8; 6],
    pub class: u8,
    pub remaining: u8,
    /// Payload bytes following this header.
    pub len: u8,
}

assert_eq_size!(FragmentHeader, [u8; 12]);

/// A parsed point-to-point frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentView<'a> {
    pub addr: MacAddr,
    pub class: LinkClass,
    pub remaining: u8,
    pub payload: &'a [u8],
}

/// Build one frame: header followed immediately by the payload.
pub fn encode_fragment(
    addr: MacAddr,
    class: LinkClass,
    remaining: u8,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    if payload.len() > FRAGMENT_PAYLOAD_MAX {
        return Err(WireError::PayloadTooLarge(payload.len(), FRAGMENT_PAYLOAD_MAX));
    }
    let header = FragmentHeader {
        tag: LINK_TAG,
        addr: addr.octets(),
        class: class.into(),
        remaining,
        len: payload.len() as u8,
    };
    let mut frame = Vec::with_capacity(FRAGMENT_HEADER_LEN + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Parse a frame received from the link primitive.
pub fn decode_fragment(frame: &[u8]) -> Result<FragmentView<'_>, WireError> {
    let header = FragmentHeader::read_from_prefix(frame)
        .ok_or(WireError::Truncated(frame.len(), FRAGMENT_HEADER_LEN))?;
    if header.tag != LINK_TAG {
        return Err(WireError::BadTag(header.tag));
    }
    let class = LinkClass::try_from(header.class)?;
    let payload = &frame[FRAGMENT_HEADER_LEN..];
    if payload.len() != header.len as usize {
        return Err(WireError::LengthMismatch {
            declared: header.len as usize,
            actual: payload.len(),
        });
    }
    Ok(FragmentView {
        addr: MacAddr(header.addr),
        class,
        remaining: header.remaining,
        payload,
    })
}

// ── Type Flags ────────────────────────────────────────────────────────────────

/// Payload protocol hint carried in bits 7-8 of the type flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Proto {
    #[default]
    Binary = 0,
    Json = 1,
    Http = 2,
    Mqtt = 3,
}

impl Proto {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Proto::Binary,
            1 => Proto::Json,
            2 => Proto::Http,
            _ => Proto::Mqtt,
        }
    }
}

/// Routing and interpretation hints attached to every mesh segment.
///
///   bit  0: encrypted
///   bit  1: to_server (origin address present)
///   bit  2: blocking_send
///   bit  3: group
///   bit  4: no_response
///   bit  5: ota
///   bit  6: notice
///   bits 7-8: proto
///   bits 9-16: layer
///   bits 17-31: reserved, zero on send, ignored on receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeFlags {
    pub encrypted: bool,
    pub to_server: bool,
    pub blocking_send: bool,
    pub group: bool,
    pub no_response: bool,
    pub ota: bool,
    pub notice: bool,
    pub proto: Proto,
    pub layer: u8,
}

impl TypeFlags {
    pub fn to_bits(&self) -> u32 {
        (self.encrypted as u32)
            | (self.to_server as u32) << 1
            | (self.blocking_send as u32) << 2
            | (self.group as u32) << 3
            | (self.no_response as u32) << 4
            | (self.ota as u32) << 5
            | (self.notice as u32) << 6
            | (self.proto as u32) << 7
            | (self.layer as u32) << 9
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            encrypted: bits & 1 != 0,
            to_server: bits & (1 << 1) != 0,
            blocking_send: bits & (1 << 2) != 0,
            group: bits & (1 << 3) != 0,
            no_response: bits & (1 << 4) != 0,
            ota: bits & (1 << 5) != 0,
            notice: bits & (1 << 6) != 0,
            proto: Proto::from_bits((bits >> 7) as u8),
            layer: (bits >> 9) as u8,
        }
    }
}

// ── Segment Header ────────────────────────────────────────────────────────────

/// Fixed part of the out-of-band mesh metadata.
///
/// Wire size: 11 bytes, followed by a 6-byte origin address when the
/// `to_server` flag is set.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SegmentHeaderRaw {
    pub seq: u8,
    pub total_size: U16<LittleEndian>,
    pub packet_id: U32<LittleEndian>,
    pub type_flags: U32<LittleEndian>,
}

assert_eq_size!(SegmentHeaderRaw, [u8; 11]);

/// Metadata describing one mesh segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Position of this segment, 0..N-1 within one message.
    pub seq: u8,
    /// Size of the whole logical message.
    pub total_size: u16,
    /// Shared by every segment of one message; the deduplication key.
    pub packet_id: u32,
    pub flags: TypeFlags,
    /// Ultimate origin. Present exactly when `flags.to_server` is set.
    pub origin: Option<MacAddr>,
}

impl SegmentHeader {
    pub fn encoded_len(&self) -> usize {
        if self.flags.to_server {
            SEGMENT_HEADER_LEN + 6
        } else {
            SEGMENT_HEADER_LEN
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let raw = SegmentHeaderRaw {
            seq: self.seq,
            total_size: U16::new(self.total_size),
            packet_id: U32::new(self.packet_id),
            type_flags: U32::new(self.flags.to_bits()),
        };
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(raw.as_bytes());
        match (self.flags.to_server, self.origin) {
            (true, Some(origin)) => out.extend_from_slice(&origin.octets()),
            (true, None) => return Err(WireError::MissingOrigin),
            (false, _) => {}
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let raw = SegmentHeaderRaw::read_from_prefix(bytes)
            .ok_or(WireError::Truncated(bytes.len(), SEGMENT_HEADER_LEN))?;
        let flags = TypeFlags::from_bits(raw.type_flags.get());
        let origin = if flags.to_server {
            let rest = &bytes[SEGMENT_HEADER_LEN..];
            let octets: [u8; 6] = rest
                .get(..6)
                .and_then(|s| s.try_into().ok())
                .ok_or(WireError::Truncated(bytes.len(), SEGMENT_HEADER_LEN + 6))?;
            Some(MacAddr(octets))
        } else {
            None
        };
        Ok(Self {
            seq: raw.seq,
            total_size: raw.total_size.get(),
            packet_id: raw.packet_id.get(),
            flags,
            origin,
        })
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Tag at the start of every link frame.
pub const LINK_TAG: [u8; 3] = [0x52, 0x4d, 0x4c];

pub const FRAGMENT_HEADER_LEN: usize = 12;

/// Payload bytes per link fragment.
pub const FRAGMENT_PAYLOAD_MAX: usize = 250;

/// `remaining` is one byte, so a message spans at most 256 fragments.
pub const FRAGMENT_COUNT_MAX: usize = u8::MAX as usize + 1;

/// Largest message the fragment header can describe.
pub const LINK_MESSAGE_MAX: usize = FRAGMENT_COUNT_MAX * FRAGMENT_PAYLOAD_MAX;

pub const SEGMENT_HEADER_LEN: usize = 11;

/// Payload bytes per mesh segment.
pub const SEGMENT_PAYLOAD_MAX: usize = 1440;

/// `total_size` is two bytes.
pub const MESH_MESSAGE_MAX: usize = u16::MAX as usize;

/// Number of fragments needed for a link message of `len` bytes.
pub fn fragment_count(len: usize) -> usize {
    len.div_ceil(FRAGMENT_PAYLOAD_MAX).max(1)
}

/// Number of segments needed for a mesh message of `len` bytes.
pub fn segment_count(len: usize) -> usize {
    len.div_ceil(SEGMENT_PAYLOAD_MAX).max(1)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("foreign frame tag: {0:02x?}")]
    BadTag([u8; 3]),

    #[error("unknown link class: 0x{0:02x}")]
    UnknownClass(u8),

    #[error("frame of {0} bytes is shorter than the {1}-byte header")]
    Truncated(usize, usize),

    #[error("declared payload length {declared} does not match {actual} received bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload length {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),

    #[error("to_server segment without an origin address")]
    MissingOrigin,

    #[error("malformed address: {0:?}")]
    BadAddress(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
