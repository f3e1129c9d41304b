//! Point-to-point transport: fragmented, class-multiplexed datagrams
//! between directly reachable peers.
//!
//! Outbound messages are cut into fragments of at most 250 payload bytes and
//! sent one at a time, each confirmed by the radio's completion signal before
//! the next goes out. Inbound frames are validated and queued per class by
//! the dispatcher; `read` reassembles from its class queue.

mod dispatch;
mod transport;

pub use dispatch::Fragment;
pub use transport::{LinkMessage, LinkStats, LinkTransport};
