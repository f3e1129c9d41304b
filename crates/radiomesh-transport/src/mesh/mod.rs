//! Mesh transport: arbitrarily large messages over a multi-hop primitive
//! that only carries ~1.4KB per call.
//!
//! Messages are cut into segments sharing one packet id; the receiver
//! reassembles by sequence number, drops retransmissions of completed
//! messages, and diverts firmware-update segments to an upgrade writer.
//! The root additionally bridges traffic to and from the external network.

mod context;
mod reassembly;
mod transport;

pub use context::{DedupFilter, MeshContext};
pub use transport::{MeshMessage, MeshStats, MeshTransport};
