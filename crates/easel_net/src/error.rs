//! Network error types.

use std::time::Duration;

use easel_core::BoardId;

/// Errors that can occur in the easel_net crate.
///
/// A stale mutation version is deliberately NOT represented here: rejection
/// is a normal protocol outcome (`easel_core::VersionConflict`), not a
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A transport-level error (WebSocket connect/send/receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A peer sent a payload that does not match its message kind.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No pooled connection exists for the given key.
    #[error("No connection to peer: {0}")]
    UnknownPeer(String),

    /// The board is not in the local registry.
    #[error("Board not found: {0}")]
    BoardNotFound(BoardId),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No directory server is configured for this peer.
    #[error("No directory server configured")]
    NoDirectory,

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The node is not running.
    #[error("Node not running")]
    NotRunning,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
