//! Errors surfaced by the link and mesh transports.

use radiomesh_core::{LinkClass, MacAddr, WireError};

use crate::radio::RadioError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Bad size, bad address or similar. Never worth retrying.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("transport used before init()")]
    NotInitialized,

    #[error("link class {0:?} is not enabled")]
    ClassDisabled(LinkClass),

    #[error("operation is only valid on the root node")]
    NotRoot,

    /// The radio primitive reported a failure. Carries the primitive's code.
    #[error("radio primitive failed with code 0x{0:x}")]
    Link(i32),

    /// The radio accepted the fragment but reported it undelivered.
    #[error("fragment to {peer} was not confirmed")]
    SendFailed { peer: MacAddr },

    /// The wait budget ran out before anything arrived or was confirmed.
    #[error("timed out")]
    Timeout,

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// Negated primitive code for link failures, the form consumers log and
    /// compare against.
    pub fn negated_code(&self) -> Option<i32> {
        match self {
            TransportError::Link(code) => Some(code.wrapping_neg()),
            _ => None,
        }
    }
}

impl From<RadioError> for TransportError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::Timeout => TransportError::Timeout,
            RadioError::Code(code) => TransportError::Link(code),
        }
    }
}
