//! Wire protocol — envelope-based typed messaging between peers and the
//! directory server.
//!
//! Every frame on the wire is a JSON [`Envelope`] tagged with a
//! [`MessageKind`]. The payload is one of the typed records below rather
//! than a delimiter-packed string; the compact text forms survive only as
//! the defined serializers on `BoardId` and `BoardSnapshot`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use easel_core::{BoardId, BoardSnapshot, PathToken, PeerAddr};

use crate::error::NetError;

/// The kind of message carried in an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // ── Directory protocol (peer ↔ directory) ───────────────────────
    /// Peer → directory: start advertising a board.
    ShareBoard,
    /// Peer → directory: stop advertising a board.
    UnshareBoard,
    /// Directory → peers: a board is being shared (replayed on connect,
    /// broadcast on change).
    SharingBoard,
    /// Directory → peers: a board is no longer shared.
    UnsharingBoard,
    /// Directory → peer: a request could not be understood.
    DirectoryError,

    // ── Board replication (peer ↔ peer) ─────────────────────────────
    /// Viewer → owner: request the full board state.
    GetBoardData,
    /// Owner → viewer: full board state.
    BoardData,
    /// Viewer → owner: subscribe to incremental updates for one board.
    BoardListen,
    /// Viewer → owner: unsubscribe from one board.
    BoardUnlisten,
    /// Viewer → owner: add a path, gated on the submitted version.
    BoardPathUpdate,
    /// Owner → submitter: the path was accepted.
    BoardPathAccepted,
    /// Owner → other listeners: broadcast of an accepted path add.
    UpdateToRemote,
    /// Viewer → owner: undo request / owner → other listeners broadcast.
    BoardUndoUpdate,
    /// Owner → submitter: the undo was accepted.
    BoardUndoAccepted,
    /// Viewer → owner: clear request / owner → other listeners broadcast.
    BoardClearUpdate,
    /// Owner → submitter: the clear was accepted.
    BoardClearAccepted,
    /// Owner → listeners: the board no longer exists.
    BoardDeleted,
    /// Owner → viewer: a request failed (unknown board, stale version, ...).
    /// A stale-version report is the viewer's cue to fetch the full state.
    BoardError,
}

impl MessageKind {
    /// String key used for handler dispatch.
    pub fn dispatch_key(&self) -> &'static str {
        match self {
            Self::ShareBoard => "share_board",
            Self::UnshareBoard => "unshare_board",
            Self::SharingBoard => "sharing_board",
            Self::UnsharingBoard => "unsharing_board",
            Self::DirectoryError => "directory_error",
            Self::GetBoardData => "get_board_data",
            Self::BoardData => "board_data",
            Self::BoardListen => "board_listen",
            Self::BoardUnlisten => "board_unlisten",
            Self::BoardPathUpdate => "board_path_update",
            Self::BoardPathAccepted => "board_path_accepted",
            Self::UpdateToRemote => "update_to_remote",
            Self::BoardUndoUpdate => "board_undo_update",
            Self::BoardUndoAccepted => "board_undo_accepted",
            Self::BoardClearUpdate => "board_clear_update",
            Self::BoardClearAccepted => "board_clear_accepted",
            Self::BoardDeleted => "board_deleted",
            Self::BoardError => "board_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload records
// ---------------------------------------------------------------------------

/// Payload naming just a board: share/unshare, listen/unlisten, get-data,
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRef {
    pub board: BoardId,
}

/// Payload for undo/clear requests, echoes, and broadcasts. `version` is the
/// version the board was at before the mutation (the submitted version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRef {
    pub board: BoardId,
    pub version: u64,
}

/// Payload for path adds, echoes, and broadcasts. `version` is the submitted
/// version, i.e. the board version without the path applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathUpdate {
    pub board: BoardId,
    pub version: u64,
    pub path: PathToken,
}

/// Payload for error reports from the directory or a board owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The board the error concerns, when there is one.
    pub board: Option<BoardId>,
    pub message: String,
}

// `BoardData` carries an `easel_core::BoardSnapshot` directly.

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A network message envelope carrying a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUID v4).
    pub id: String,
    /// Advertised `host:port` identity of the sender.
    pub from: PeerAddr,
    /// The kind of message; determines how `payload` is interpreted.
    pub kind: MessageKind,
    /// The payload record, serialized as JSON.
    pub payload: serde_json::Value,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create a new envelope with an already-serialized payload.
    pub fn new(from: PeerAddr, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create an envelope from a typed payload record.
    pub fn with<T: Serialize>(from: PeerAddr, kind: MessageKind, payload: &T) -> Self {
        Self::new(from, kind, serde_json::to_value(payload).unwrap_or_default())
    }

    /// Parse the payload as the record type the message kind implies.
    /// A mismatch is a protocol error: the connection stays alive and the
    /// frame is dropped by the caller.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            NetError::Protocol(format!(
                "bad {} payload from {}: {e}",
                self.kind.dispatch_key(),
                self.from
            ))
        })
    }

    /// Serialize the envelope to a JSON string for transmission.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an envelope from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Envelope {
    pub fn board_ref(from: PeerAddr, kind: MessageKind, board: BoardId) -> Self {
        Self::with(from, kind, &BoardRef { board })
    }

    pub fn versioned(from: PeerAddr, kind: MessageKind, board: BoardId, version: u64) -> Self {
        Self::with(from, kind, &VersionedRef { board, version })
    }

    pub fn path_update(
        from: PeerAddr,
        kind: MessageKind,
        board: BoardId,
        version: u64,
        path: PathToken,
    ) -> Self {
        Self::with(
            from,
            kind,
            &PathUpdate {
                board,
                version,
                path,
            },
        )
    }

    pub fn board_data(from: PeerAddr, snapshot: &BoardSnapshot) -> Self {
        Self::with(from, MessageKind::BoardData, snapshot)
    }

    pub fn error_report(
        from: PeerAddr,
        kind: MessageKind,
        board: Option<BoardId>,
        message: impl Into<String>,
    ) -> Self {
        Self::with(
            from,
            kind,
            &ErrorReport {
                board,
                message: message.into(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
