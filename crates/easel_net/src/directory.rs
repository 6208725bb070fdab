//! Directory server — the rendezvous point where peers advertise boards.
//!
//! The directory keeps one piece of state: the set of currently shared
//! board ids. Peers connect to it, announce boards with `ShareBoard` /
//! `UnshareBoard`, and receive `SharingBoard` / `UnsharingBoard` broadcasts
//! about everyone else's announcements. A newly connected peer is replayed
//! the full shared set so it starts with a complete view.
//!
//! The directory does not validate ownership: any peer may announce or
//! retract any board id. It also keeps entries for boards whose announcer
//! has disconnected; a stale entry surfaces later as a failed dial on the
//! viewer's side rather than as a directory-level retraction.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

use easel_core::{BoardId, PeerAddr};

use crate::error::NetError;
use crate::message::{BoardRef, Envelope, MessageKind};
use crate::pool::ConnectionPool;
use crate::router::Outbound;
use crate::transport::{ConnKey, TransportEvent, TransportServer};

/// Pure directory state: connected peers and the advertised board set.
///
/// Every transition returns the envelopes to send, so the broadcast rules
/// are testable without sockets.
pub struct DirectoryState {
    identity: PeerAddr,
    peers: HashSet<ConnKey>,
    shared: HashSet<BoardId>,
}

impl DirectoryState {
    pub fn new(identity: PeerAddr) -> Self {
        Self {
            identity,
            peers: HashSet::new(),
            shared: HashSet::new(),
        }
    }

    /// A peer connected: track it and replay every currently shared board.
    pub fn on_connect(&mut self, key: ConnKey) -> Vec<Outbound> {
        let replay = self
            .shared
            .iter()
            .map(|board| {
                Outbound::new(
                    key.clone(),
                    Envelope::board_ref(
                        self.identity.clone(),
                        MessageKind::SharingBoard,
                        board.clone(),
                    ),
                )
            })
            .collect();
        self.peers.insert(key);
        replay
    }

    /// A peer disconnected: forget the connection. Shared entries it
    /// announced stay in the set.
    pub fn on_disconnect(&mut self, key: &str) {
        self.peers.remove(key);
    }

    /// Handle `ShareBoard`: record the id and tell every other peer.
    ///
    /// Re-announcing an already shared board is a no-op with no broadcast.
    pub fn on_share(&mut self, from: &str, board: BoardId) -> Vec<Outbound> {
        if !self.shared.insert(board.clone()) {
            debug!("Board {board} already shared, ignoring");
            return Vec::new();
        }
        info!("Board shared: {board}");
        self.broadcast_except(from, MessageKind::SharingBoard, board)
    }

    /// Handle `UnshareBoard`: drop the id and tell every other peer.
    pub fn on_unshare(&mut self, from: &str, board: BoardId) -> Vec<Outbound> {
        if !self.shared.remove(&board) {
            debug!("Board {board} not shared, ignoring unshare");
            return Vec::new();
        }
        info!("Board unshared: {board}");
        self.broadcast_except(from, MessageKind::UnsharingBoard, board)
    }

    /// Reply to a malformed announcement with a `DirectoryError`.
    pub fn reject(&self, to: &str, message: impl Into<String>) -> Vec<Outbound> {
        vec![Outbound::new(
            to.to_string(),
            Envelope::error_report(
                self.identity.clone(),
                MessageKind::DirectoryError,
                None,
                message,
            ),
        )]
    }

    fn broadcast_except(&self, except: &str, kind: MessageKind, board: BoardId) -> Vec<Outbound> {
        self.peers
            .iter()
            .filter(|key| key.as_str() != except)
            .map(|key| {
                Outbound::new(
                    key.clone(),
                    Envelope::board_ref(self.identity.clone(), kind, board.clone()),
                )
            })
            .collect()
    }

    pub fn shared_boards(&self) -> Vec<BoardId> {
        self.shared.iter().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// The directory server: a bound listener plus the directory state.
///
/// The shutdown receivers are created in [`bind`](Self::bind), so a signal
/// sent through [`shutdown_handle`](Self::shutdown_handle) before
/// [`run`](Self::run) is first polled still stops the server.
pub struct DirectoryServer {
    server: TransportServer,
    state: Arc<RwLock<DirectoryState>>,
    shutdown_tx: broadcast::Sender<()>,
    loop_shutdown_rx: broadcast::Receiver<()>,
    accept_shutdown_rx: broadcast::Receiver<()>,
}

impl DirectoryServer {
    /// Bind the directory's listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let server = TransportServer::bind(addr).await?;
        let identity: PeerAddr = server
            .local_addr()
            .to_string()
            .parse()
            .map_err(|e| NetError::Protocol(format!("Bad local address: {e}")))?;
        let (shutdown_tx, loop_shutdown_rx) = broadcast::channel(1);
        let accept_shutdown_rx = shutdown_tx.subscribe();
        Ok(Self {
            server,
            state: Arc::new(RwLock::new(DirectoryState::new(identity))),
            shutdown_tx,
            loop_shutdown_rx,
            accept_shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Signal the accept loop and event loop to stop.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the directory until shutdown is signalled.
    pub async fn run(self) {
        let (event_tx, mut event_rx) = mpsc::channel::<TransportEvent>(256);
        let (conn_tx, mut conn_rx) = mpsc::channel(64);
        let pool = ConnectionPool::new(event_tx.clone(), std::time::Duration::from_secs(10));

        let mut shutdown_rx = self.loop_shutdown_rx;
        let accept_shutdown = self.accept_shutdown_rx;
        let state = self.state;
        let server = self.server;

        tokio::spawn(async move {
            server.run(event_tx, conn_tx, accept_shutdown).await;
        });

        loop {
            // Connection handles arrive before the first event from the same
            // socket; poll them first so replies and replays have a sink.
            tokio::select! {
                biased;
                Some((key, conn)) = conn_rx.recv() => {
                    pool.insert(key, conn).await;
                }
                Some(event) = event_rx.recv() => {
                    if let TransportEvent::Disconnected { key } = &event {
                        pool.remove(key).await;
                    }
                    let outbound = handle_event(&state, event).await;
                    pool.send_all(outbound).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Directory shutting down");
                    pool.close_all().await;
                    break;
                }
            }
        }
    }
}

async fn handle_event(
    state: &Arc<RwLock<DirectoryState>>,
    event: TransportEvent,
) -> Vec<Outbound> {
    match event {
        TransportEvent::InboundConnection { key } => {
            debug!("Directory peer connected: {key}");
            state.write().await.on_connect(key)
        }
        TransportEvent::Disconnected { key } => {
            debug!("Directory peer disconnected: {key}");
            state.write().await.on_disconnect(&key);
            Vec::new()
        }
        TransportEvent::Message { key, envelope } => match envelope.kind {
            MessageKind::ShareBoard => match envelope.parse::<BoardRef>() {
                Ok(payload) => state.write().await.on_share(&key, payload.board),
                Err(e) => {
                    warn!("Malformed ShareBoard from {key}: {e}");
                    state.read().await.reject(&key, format!("Invalid share: {e}"))
                }
            },
            MessageKind::UnshareBoard => match envelope.parse::<BoardRef>() {
                Ok(payload) => state.write().await.on_unshare(&key, payload.board),
                Err(e) => {
                    warn!("Malformed UnshareBoard from {key}: {e}");
                    state
                        .read()
                        .await
                        .reject(&key, format!("Invalid unshare: {e}"))
                }
            },
            other => {
                warn!("Directory ignoring unexpected message kind {other:?} from {key}");
                Vec::new()
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
