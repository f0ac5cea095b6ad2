//! CSI error types.
//!
//! A CSI call can fail in two fundamentally different ways: the plugin
//! answered with a [`Status`] (the only signal the protocol contract talks
//! about), or the call never completed because the transport broke or timed
//! out.  [`CsiError`] keeps the two apart so callers can tell a protocol
//! answer from an infrastructure problem.

use std::time::Duration;

use thiserror::Error;

use crate::status::{Code, Status};

/// Unified error type for CSI calls.
#[derive(Debug, Error, Clone)]
pub enum CsiError {
    /// The plugin answered with a non-OK status.
    #[error("{0}")]
    Status(Status),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The call did not complete within the configured deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The plugin replied with a message that does not answer the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Status code of a plugin answer, `None` for transport-level failures.
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Status(status) => Some(status.code()),
            _ => None,
        }
    }
}

impl From<Status> for CsiError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}
