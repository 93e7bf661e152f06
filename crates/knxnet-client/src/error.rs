//! Error types for the client crate.

use knxnet_core::protocol::body::ErrorCode;
use knxnet_core::ProtocolError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the client facade and the communication core.
///
/// A timeout is deliberately *not* here: operations that can legitimately
/// go unanswered return `Ok(None)` (or `false`) instead, and only the
/// handshake paths that cannot proceed without an answer map that absence
/// to [`ClientError::NoResponse`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded for sending.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The gateway answered a request with a non-zero status code.
    #[error("gateway rejected the request: {code:?}")]
    Rejected { code: ErrorCode },

    /// A required response never arrived within the retry budget.
    #[error("no response from gateway within the retry budget")]
    NoResponse,

    /// The client (or one of its communicators) is already closed.
    #[error("client is closed")]
    Closed,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
