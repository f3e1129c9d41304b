//! radiomesh-transport — point-to-point and mesh transports over the radio
//! primitives, plus an in-memory radio for tests and soak runs.

pub mod error;
pub mod link;
pub mod mesh;
pub mod peer;
pub mod queue;
pub mod radio;
pub mod sim;

pub use error::TransportError;
pub use link::{LinkMessage, LinkStats, LinkTransport};
pub use mesh::{MeshContext, MeshMessage, MeshStats, MeshTransport};
pub use peer::PeerTable;
pub use queue::EvictingQueue;
pub use radio::{Direction, LinkEvents, LinkRadio, MeshFrame, MeshRadio, RadioError, UpgradeWriter};
