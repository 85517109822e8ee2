//! Network error types.

use std::net::SocketAddr;
use std::time::Duration;

use crate::identity::PeerId;

/// Errors that can occur in the shot_network crate.
///
/// Only [`NetworkError::Bind`] is ever surfaced as a hard failure of
/// [`Node::start`](crate::Node::start). Everything produced while sending is
/// folded into a [`SendStatus`](crate::SendStatus) by the node.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The listening endpoint could not be bound (port in use, bad address).
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The requested peer is not in the peer table.
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Connect or write did not finish within the configured budget.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The remote end refused the connection.
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// Any other transport-level failure (reset, broken pipe, DNS...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded into a message.
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outbound message could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame exceeded the maximum allowed size.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The node is not running.
    #[error("Node not running")]
    NotRunning,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Classify an I/O error raised while talking to `addr`.
    pub(crate) fn from_io(addr: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(addr.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout(Duration::ZERO),
            _ => Self::Transport(format!("{addr}: {err}")),
        }
    }

    /// Build a bind error for the given address.
    pub(crate) fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }

    /// Whether this error came from the transport (and therefore counts
    /// against a peer's failure budget).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionRefused(_) | Self::Transport(_) | Self::Io(_)
        )
    }
}

/// Errors returned by message handlers.
///
/// These never escape the dispatcher: they are logged and reported as
/// [`DispatchOutcome::Failed`](crate::router::DispatchOutcome::Failed).
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler expects.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A network operation issued by the handler failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Free-form failure from an application handler.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}
