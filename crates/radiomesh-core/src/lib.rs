//! radiomesh-core — wire format, wait budgets, peer policy and configuration.
//! The transport crate and the daemon depend on this one.

pub mod config;
pub mod peer;
pub mod wait;
pub mod wire;

pub use peer::PeerEncryption;
pub use wait::{Deadline, Wait};
pub use wire::{LinkClass, MacAddr, SegmentHeader, TypeFlags, WireError};
