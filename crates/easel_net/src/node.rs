//! Peer node — ties transport, routing, hosting, and replication together.
//!
//! A [`PeerNode`] is one participant: it listens for inbound peers, keeps a
//! lazy pool of outbound connections, registers with the directory server
//! when one is configured, and routes every inbound envelope to the board
//! host (for boards it owns) or the replicator (for boards it follows).

use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use easel_core::{Board, BoardId, BoardRegistry, Mutation, PathToken, PeerAddr};

use crate::config::NetConfig;
use crate::error::NetError;
use crate::host::BoardHost;
use crate::message::{BoardRef, Envelope, MessageKind, PathUpdate, VersionedRef};
use crate::pool::ConnectionPool;
use crate::replica::Replicator;
use crate::router::{MessageRouter, Outbound};
use crate::transport::{ConnKey, PeerConnection, TransportEvent, TransportServer};

/// Result of submitting an edit through [`PeerNode::add_path`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Applied immediately to a board this peer owns; holds the new version.
    Applied(u64),
    /// The mutation could not apply to the owned board (undo on empty).
    Rejected,
    /// Sent to the owning peer; the decision arrives asynchronously.
    Forwarded,
}

/// A whiteboard peer: board owner, board viewer, or both at once.
pub struct PeerNode {
    config: NetConfig,
    registry: Arc<RwLock<BoardRegistry>>,
    identity: Arc<OnceLock<PeerAddr>>,
    host: BoardHost,
    pool: ConnectionPool,
    router: Arc<MessageRouter>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    conn_tx: mpsc::Sender<(ConnKey, PeerConnection)>,
    conn_rx: Mutex<Option<mpsc::Receiver<(ConnKey, PeerConnection)>>>,
    shutdown_tx: broadcast::Sender<()>,
    directory_key: Arc<RwLock<Option<ConnKey>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerNode {
    pub fn new(config: NetConfig) -> Self {
        let registry = Arc::new(RwLock::new(BoardRegistry::new()));
        let identity = Arc::new(OnceLock::new());
        let host = BoardHost::new(registry.clone(), identity.clone());
        let replica = Replicator::new(registry.clone(), identity.clone());

        let (event_tx, event_rx) = mpsc::channel(256);
        let (conn_tx, conn_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = ConnectionPool::new(event_tx.clone(), config.connect_timeout);

        let router = Arc::new(build_router(registry.clone(), host.clone(), replica));

        Self {
            config,
            registry,
            identity,
            host,
            pool,
            router,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            conn_tx,
            conn_rx: Mutex::new(Some(conn_rx)),
            shutdown_tx,
            directory_key: Arc::new(RwLock::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the listener, fix this peer's identity, register with the
    /// directory if one is configured, and start the event loop.
    pub async fn start(&self) -> Result<(), NetError> {
        let server = TransportServer::bind(self.config.listen_addr).await?;
        // Board ids embed this identity, so it must be an address other
        // peers can dial. A wildcard bind (0.0.0.0) is fine for listening
        // but useless to advertise; `advertised_addr` overrides it.
        let identity: PeerAddr = match &self.config.advertised_addr {
            Some(addr) => addr
                .parse()
                .map_err(|e| NetError::Protocol(format!("Bad advertised address: {e}")))?,
            None => server
                .local_addr()
                .to_string()
                .parse()
                .map_err(|e| NetError::Protocol(format!("Bad local address: {e}")))?,
        };
        self.identity
            .set(identity.clone())
            .map_err(|_| NetError::Protocol("Node already started".into()))?;
        info!("Peer {identity} starting");

        let server_task = {
            let event_tx = self.event_tx.clone();
            let conn_tx = self.conn_tx.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                server.run(event_tx, conn_tx, shutdown_rx).await;
            })
        };

        if let Some(dir_addr) = &self.config.directory_addr {
            let peer: PeerAddr = dir_addr
                .parse()
                .map_err(|e| NetError::Protocol(format!("Bad directory address: {e}")))?;
            let key = self.pool.ensure(&peer).await?;
            info!("Registered with directory at {key}");
            *self.directory_key.write().await = Some(key);
        }

        let event_rx = self
            .event_rx
            .lock()
            .await
            .take()
            .ok_or(NetError::Protocol("Node already started".into()))?;
        let conn_rx = self
            .conn_rx
            .lock()
            .await
            .take()
            .ok_or(NetError::Protocol("Node already started".into()))?;
        let loop_task = self.spawn_event_loop(event_rx, conn_rx);

        let mut tasks = self.tasks.lock().await;
        tasks.push(server_task);
        tasks.push(loop_task);
        Ok(())
    }

    fn spawn_event_loop(
        &self,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        mut conn_rx: mpsc::Receiver<(ConnKey, PeerConnection)>,
    ) -> JoinHandle<()> {
        let router = self.router.clone();
        let pool = self.pool.clone();
        let host = self.host.clone();
        let registry = self.registry.clone();
        let directory_key = self.directory_key.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                // Connection handles arrive before the first event from the
                // same socket; poll them first so replies have a sink.
                tokio::select! {
                    biased;
                    Some((key, conn)) = conn_rx.recv() => {
                        pool.insert(key, conn).await;
                    }
                    Some(event) = event_rx.recv() => {
                        match event {
                            TransportEvent::InboundConnection { key } => {
                                debug!("Peer connected: {key}");
                            }
                            TransportEvent::Message { key, envelope } => {
                                let outbound = router.dispatch(key, envelope).await;
                                pool.send_all(outbound).await;
                            }
                            TransportEvent::Disconnected { key } => {
                                handle_disconnect(
                                    &key,
                                    &pool,
                                    &host,
                                    &registry,
                                    &directory_key,
                                )
                                .await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Event loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// The identity this peer advertises, once started.
    pub fn local_addr(&self) -> Option<&PeerAddr> {
        self.identity.get()
    }

    fn require_identity(&self) -> Result<PeerAddr, NetError> {
        self.identity.get().cloned().ok_or(NetError::NotRunning)
    }

    // -- Board management ---------------------------------------------------

    /// Create a new, unshared board owned by this peer.
    pub async fn create_board(&self, name: &str) -> Result<BoardId, NetError> {
        let identity = self.require_identity()?;
        let id = BoardId::new(identity, name)
            .map_err(|e| NetError::Protocol(format!("Bad board name: {e}")))?;
        let mut registry = self.registry.write().await;
        if !registry.insert(Board::new(id.clone(), false)) {
            return Err(NetError::Protocol(format!("Board {id} already exists")));
        }
        info!("Created board {id}");
        Ok(id)
    }

    /// Advertise an owned board at the directory.
    pub async fn share_board(&self, id: &BoardId) -> Result<(), NetError> {
        let identity = self.require_identity()?;
        {
            let mut registry = self.registry.write().await;
            let board = registry
                .get_mut(id)
                .filter(|b| !b.is_remote())
                .ok_or_else(|| NetError::BoardNotFound(id.clone()))?;
            board.set_shared(true);
        }
        self.send_to_directory(Envelope::board_ref(
            identity,
            MessageKind::ShareBoard,
            id.clone(),
        ))
        .await
    }

    /// Withdraw an owned board's advertisement.
    pub async fn unshare_board(&self, id: &BoardId) -> Result<(), NetError> {
        let identity = self.require_identity()?;
        {
            let mut registry = self.registry.write().await;
            let board = registry
                .get_mut(id)
                .filter(|b| !b.is_remote())
                .ok_or_else(|| NetError::BoardNotFound(id.clone()))?;
            board.set_shared(false);
        }
        self.send_to_directory(Envelope::board_ref(
            identity,
            MessageKind::UnshareBoard,
            id.clone(),
        ))
        .await
    }

    /// All board ids this peer knows, owned and remote alike.
    pub async fn boards(&self) -> Vec<BoardId> {
        self.registry.read().await.ids()
    }

    pub async fn local_boards(&self) -> Vec<BoardId> {
        self.registry.read().await.local_ids()
    }

    /// Current version of a known board, owned or replica.
    pub async fn board_version(&self, id: &BoardId) -> Option<u64> {
        self.registry.read().await.get(id).map(|b| b.version())
    }

    pub async fn board_paths(&self, id: &BoardId) -> Option<Vec<PathToken>> {
        self.registry.read().await.get(id).map(|b| b.paths().to_vec())
    }

    // -- Viewing remote boards ----------------------------------------------

    /// Start following a remote board: connect to its owner (reusing any
    /// existing connection), fetch the full state, and subscribe to updates.
    pub async fn select_board(&self, id: &BoardId) -> Result<(), NetError> {
        let identity = self.require_identity()?;
        {
            let registry = self.registry.read().await;
            let board = registry
                .get(id)
                .ok_or_else(|| NetError::BoardNotFound(id.clone()))?;
            if !board.is_remote() {
                return Err(NetError::Protocol(format!("{id} is owned locally")));
            }
        }
        let key = self.pool.ensure(id.owner()).await?;
        self.pool
            .send_to(
                &key,
                &Envelope::board_ref(identity.clone(), MessageKind::GetBoardData, id.clone()),
            )
            .await?;
        self.pool
            .send_to(
                &key,
                &Envelope::board_ref(identity, MessageKind::BoardListen, id.clone()),
            )
            .await
    }

    /// Stop following a remote board. The connection stays pooled.
    pub async fn deselect_board(&self, id: &BoardId) -> Result<(), NetError> {
        let identity = self.require_identity()?;
        let key: ConnKey = id.owner().to_string();
        self.pool
            .send_to(
                &key,
                &Envelope::board_ref(identity, MessageKind::BoardUnlisten, id.clone()),
            )
            .await
    }

    // -- Edits --------------------------------------------------------------

    /// Add a path to a board. Owned boards apply immediately and fan out to
    /// listeners; remote boards forward the request to the owner gated on
    /// the replica's current version.
    pub async fn add_path(&self, id: &BoardId, path: PathToken) -> Result<EditOutcome, NetError> {
        self.submit(id, Mutation::AddPath(path)).await
    }

    /// Undo the most recent path on a board.
    pub async fn undo(&self, id: &BoardId) -> Result<EditOutcome, NetError> {
        self.submit(id, Mutation::Undo).await
    }

    /// Remove every path from a board.
    pub async fn clear(&self, id: &BoardId) -> Result<EditOutcome, NetError> {
        self.submit(id, Mutation::Clear).await
    }

    async fn submit(&self, id: &BoardId, mutation: Mutation) -> Result<EditOutcome, NetError> {
        let identity = self.require_identity()?;
        let (remote, version) = {
            let registry = self.registry.read().await;
            let board = registry
                .get(id)
                .ok_or_else(|| NetError::BoardNotFound(id.clone()))?;
            (board.is_remote(), board.version())
        };

        if !remote {
            return match self.host.apply_local(id, &mutation).await {
                Some((new_version, broadcasts)) => {
                    self.pool.send_all(broadcasts).await;
                    Ok(EditOutcome::Applied(new_version))
                }
                None => Ok(EditOutcome::Rejected),
            };
        }

        let key = self.pool.ensure(id.owner()).await?;
        let envelope = match mutation {
            Mutation::AddPath(path) => Envelope::path_update(
                identity,
                MessageKind::BoardPathUpdate,
                id.clone(),
                version,
                path,
            ),
            Mutation::Undo => {
                Envelope::versioned(identity, MessageKind::BoardUndoUpdate, id.clone(), version)
            }
            Mutation::Clear => {
                Envelope::versioned(identity, MessageKind::BoardClearUpdate, id.clone(), version)
            }
        };
        self.pool.send_to(&key, &envelope).await?;
        Ok(EditOutcome::Forwarded)
    }

    // -- Deletion and shutdown ----------------------------------------------

    /// Delete an owned board: listeners are told the board is gone and the
    /// directory advertisement is withdrawn.
    pub async fn delete_board(&self, id: &BoardId) -> Result<(), NetError> {
        let identity = self.require_identity()?;
        let was_shared = {
            let registry = self.registry.read().await;
            let board = registry
                .get(id)
                .ok_or_else(|| NetError::BoardNotFound(id.clone()))?;
            if board.is_remote() {
                return Err(NetError::Protocol(format!("{id} is not owned here")));
            }
            board.is_shared()
        };

        let notifications = self.host.deleted_notifications(id).await;
        self.pool.send_all(notifications).await;

        if was_shared {
            let envelope =
                Envelope::board_ref(identity, MessageKind::UnshareBoard, id.clone());
            if let Err(e) = self.send_to_directory(envelope).await {
                warn!("Could not withdraw {id} at directory: {e}");
            }
        }

        self.registry.write().await.remove(id);
        info!("Deleted board {id}");
        Ok(())
    }

    /// Graceful shutdown: withdraw and announce deletion of every owned
    /// shared board, then tear the transport down. The whole sequence is
    /// bounded by the configured shutdown timeout.
    pub async fn stop(&self) {
        info!("Peer node stopping");
        let teardown = async {
            for id in self.registry.read().await.local_ids() {
                let notifications = self.host.deleted_notifications(&id).await;
                self.pool.send_all(notifications).await;
                let shared = self
                    .registry
                    .read()
                    .await
                    .get(&id)
                    .is_some_and(|b| b.is_shared());
                if shared {
                    if let Some(identity) = self.identity.get() {
                        let envelope = Envelope::board_ref(
                            identity.clone(),
                            MessageKind::UnshareBoard,
                            id.clone(),
                        );
                        let _ = self.send_to_directory(envelope).await;
                    }
                }
            }
            self.pool.close_all().await;
        };
        if tokio::time::timeout(self.config.shutdown_timeout, teardown)
            .await
            .is_err()
        {
            warn!("Shutdown sequence exceeded {:?}", self.config.shutdown_timeout);
        }

        let _ = self.shutdown_tx.send(());
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if tokio::time::timeout(self.config.shutdown_timeout, task)
                .await
                .is_err()
            {
                warn!("Task did not stop within the shutdown timeout");
            }
        }
    }

    async fn send_to_directory(&self, envelope: Envelope) -> Result<(), NetError> {
        let key = self
            .directory_key
            .read()
            .await
            .clone()
            .ok_or(NetError::NoDirectory)?;
        self.pool.send_to(&key, &envelope).await
    }
}

/// Remove a dead connection and everything that depended on it: its listener
/// memberships, the replicas of boards it owned, and (when the directory
/// itself is gone) every pooled connection.
async fn handle_disconnect(
    key: &str,
    pool: &ConnectionPool,
    host: &BoardHost,
    registry: &Arc<RwLock<BoardRegistry>>,
    directory_key: &Arc<RwLock<Option<ConnKey>>>,
) {
    debug!("Peer disconnected: {key}");
    pool.remove(key).await;
    host.handle_disconnect(key).await;

    if let Ok(owner) = key.parse::<PeerAddr>() {
        let dropped = registry.write().await.remove_owned_by(&owner);
        for id in dropped {
            info!("Owner of {id} disconnected, dropping replica");
        }
    }

    let mut dir_key = directory_key.write().await;
    if dir_key.as_deref() == Some(key) {
        error!("Lost the directory connection, closing all peer connections");
        *dir_key = None;
        drop(dir_key);
        pool.close_all().await;
    }
}

/// Wire every message kind to its handler.
///
/// `BoardUndoUpdate` and `BoardClearUpdate` are dual-role: a request when
/// the named board is owned here, a broadcast to apply when it is a replica.
fn build_router(
    registry: Arc<RwLock<BoardRegistry>>,
    host: BoardHost,
    replica: Replicator,
) -> MessageRouter {
    let mut router = MessageRouter::new();

    // Directory announcements.
    {
        let replica = replica.clone();
        router.register(MessageKind::SharingBoard, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => replica.on_sharing(p.board).await,
                    Err(e) => discard("SharingBoard", e),
                }
            }
        });
    }
    {
        let replica = replica.clone();
        router.register(MessageKind::UnsharingBoard, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => replica.on_unsharing(p.board).await,
                    Err(e) => discard("UnsharingBoard", e),
                }
            }
        });
    }
    router.register(MessageKind::DirectoryError, |_from, env| async move {
        match env.parse::<crate::message::ErrorReport>() {
            Ok(report) => warn!("Directory rejected a request: {}", report.message),
            Err(e) => warn!("Unreadable DirectoryError: {e}"),
        }
        Vec::new()
    });

    // Hosting: requests against boards owned here.
    {
        let host = host.clone();
        router.register(MessageKind::BoardListen, move |from, env| {
            let host = host.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => host.on_listen(from, p.board).await,
                    Err(e) => discard("BoardListen", e),
                }
            }
        });
    }
    {
        let host = host.clone();
        router.register(MessageKind::BoardUnlisten, move |from, env| {
            let host = host.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => host.on_unlisten(from, p.board).await,
                    Err(e) => discard("BoardUnlisten", e),
                }
            }
        });
    }
    {
        let host = host.clone();
        router.register(MessageKind::GetBoardData, move |from, env| {
            let host = host.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => host.on_get_data(from, p.board).await,
                    Err(e) => discard("GetBoardData", e),
                }
            }
        });
    }
    {
        let host = host.clone();
        router.register(MessageKind::BoardPathUpdate, move |from, env| {
            let host = host.clone();
            async move {
                match env.parse::<PathUpdate>() {
                    Ok(update) => host.on_path_update(from, update).await,
                    Err(e) => discard("BoardPathUpdate", e),
                }
            }
        });
    }

    // Replication: state and decisions arriving from board owners.
    {
        let replica = replica.clone();
        router.register(MessageKind::BoardData, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<easel_core::BoardSnapshot>() {
                    Ok(snapshot) => replica.on_board_data(snapshot).await,
                    Err(e) => discard("BoardData", e),
                }
            }
        });
    }
    for kind in [MessageKind::BoardPathAccepted, MessageKind::UpdateToRemote] {
        let replica = replica.clone();
        router.register(kind, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<PathUpdate>() {
                    Ok(update) => replica.on_path(update).await,
                    Err(e) => discard("path update", e),
                }
            }
        });
    }
    {
        let replica = replica.clone();
        router.register(MessageKind::BoardUndoAccepted, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<VersionedRef>() {
                    Ok(req) => replica.on_undo(req).await,
                    Err(e) => discard("BoardUndoAccepted", e),
                }
            }
        });
    }
    {
        let replica = replica.clone();
        router.register(MessageKind::BoardClearAccepted, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<VersionedRef>() {
                    Ok(req) => replica.on_clear(req).await,
                    Err(e) => discard("BoardClearAccepted", e),
                }
            }
        });
    }
    {
        let replica = replica.clone();
        router.register(MessageKind::BoardDeleted, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<BoardRef>() {
                    Ok(p) => replica.on_deleted(p.board).await,
                    Err(e) => discard("BoardDeleted", e),
                }
            }
        });
    }
    {
        let replica = replica.clone();
        router.register(MessageKind::BoardError, move |_from, env| {
            let replica = replica.clone();
            async move {
                match env.parse::<crate::message::ErrorReport>() {
                    Ok(report) => replica.on_board_error(report).await,
                    Err(e) => discard("BoardError", e),
                }
            }
        });
    }

    // Dual-role undo and clear.
    {
        let registry = registry.clone();
        let host = host.clone();
        let replica = replica.clone();
        router.register(MessageKind::BoardUndoUpdate, move |from, env| {
            let registry = registry.clone();
            let host = host.clone();
            let replica = replica.clone();
            async move {
                match env.parse::<VersionedRef>() {
                    Ok(req) => {
                        if owns(&registry, &req.board).await {
                            host.on_undo(from, req).await
                        } else {
                            replica.on_undo(req).await
                        }
                    }
                    Err(e) => discard("BoardUndoUpdate", e),
                }
            }
        });
    }
    {
        router.register(MessageKind::BoardClearUpdate, move |from, env| {
            let registry = registry.clone();
            let host = host.clone();
            let replica = replica.clone();
            async move {
                match env.parse::<VersionedRef>() {
                    Ok(req) => {
                        if owns(&registry, &req.board).await {
                            host.on_clear(from, req).await
                        } else {
                            replica.on_clear(req).await
                        }
                    }
                    Err(e) => discard("BoardClearUpdate", e),
                }
            }
        });
    }

    router
}

async fn owns(registry: &Arc<RwLock<BoardRegistry>>, board: &BoardId) -> bool {
    registry
        .read()
        .await
        .get(board)
        .is_some_and(|b| !b.is_remote())
}

fn discard(kind: &str, err: NetError) -> Vec<Outbound> {
    warn!("Dropping malformed {kind} payload: {err}");
    Vec::new()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::directory::DirectoryServer;

    fn node_config(directory: Option<String>) -> NetConfig {
        NetConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            directory_addr: directory,
            advertised_addr: None,
            connect_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    async fn start_directory() -> (String, broadcast::Sender<()>) {
        let dir = DirectoryServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = dir.local_addr().to_string();
        let shutdown = dir.shutdown_handle();
        tokio::spawn(dir.run());
        (addr, shutdown)
    }

    /// Poll until `check` passes or two seconds elapse.
    async fn wait_for<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if check().await {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("Condition not reached within 2s");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    #[tokio::test]
    async fn test_start_fixes_identity_and_stop_is_clean() {
        let node = PeerNode::new(node_config(None));
        assert!(node.local_addr().is_none());
        node.start().await.unwrap();
        let addr = node.local_addr().unwrap().clone();
        assert_ne!(addr.port(), 0);
        node.stop().await;
    }

    #[tokio::test]
    async fn test_advertised_addr_overrides_bound_identity() {
        let mut config = node_config(None);
        config.advertised_addr = Some("198.51.100.7:4600".to_string());
        let node = PeerNode::new(config);
        node.start().await.unwrap();

        assert_eq!(node.local_addr().unwrap().to_string(), "198.51.100.7:4600");
        let id = node.create_board("b").await.unwrap();
        assert_eq!(id.owner().to_string(), "198.51.100.7:4600");
        node.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let node = PeerNode::new(node_config(None));
        node.start().await.unwrap();
        assert!(node.start().await.is_err());
        node.stop().await;
    }

    #[tokio::test]
    async fn test_api_before_start_is_not_running() {
        let node = PeerNode::new(node_config(None));
        assert!(matches!(
            node.create_board("b").await,
            Err(NetError::NotRunning)
        ));
    }

    // -- Board creation and sharing -----------------------------------------

    #[tokio::test]
    async fn test_create_board_rejects_duplicates_and_bad_names() {
        let node = PeerNode::new(node_config(None));
        node.start().await.unwrap();

        let id = node.create_board("sketch").await.unwrap();
        assert_eq!(id.owner(), node.local_addr().unwrap());
        assert!(node.create_board("sketch").await.is_err());
        assert!(node.create_board("bad%name").await.is_err());
        node.stop().await;
    }

    #[tokio::test]
    async fn test_share_without_directory_errors() {
        let node = PeerNode::new(node_config(None));
        node.start().await.unwrap();
        let id = node.create_board("b").await.unwrap();
        assert!(matches!(
            node.share_board(&id).await,
            Err(NetError::NoDirectory)
        ));
        node.stop().await;
    }

    // -- Local edits --------------------------------------------------------

    #[tokio::test]
    async fn test_local_edits_apply_immediately() {
        let node = PeerNode::new(node_config(None));
        node.start().await.unwrap();
        let id = node.create_board("b").await.unwrap();

        let outcome = node
            .add_path(&id, "line 0 0 1 1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::Applied(1));
        assert_eq!(node.undo(&id).await.unwrap(), EditOutcome::Applied(2));
        assert_eq!(node.undo(&id).await.unwrap(), EditOutcome::Rejected);
        node.stop().await;
    }

    // -- Full replication flow ----------------------------------------------

    #[tokio::test]
    async fn test_two_peers_replicate_through_directory() {
        let (dir_addr, _dir_shutdown) = start_directory().await;

        let owner = PeerNode::new(node_config(Some(dir_addr.clone())));
        owner.start().await.unwrap();
        let board = owner.create_board("shared-sketch").await.unwrap();
        owner.share_board(&board).await.unwrap();

        // A path drawn before the viewer arrives must come over in the
        // full state transfer.
        owner
            .add_path(&board, "line 0 0 9 9".parse().unwrap())
            .await
            .unwrap();

        let viewer = PeerNode::new(node_config(Some(dir_addr.clone())));
        viewer.start().await.unwrap();

        // Directory replay announces the board to the late joiner.
        wait_for(|| async { viewer.boards().await.contains(&board) }).await;

        viewer.select_board(&board).await.unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(1) }).await;
        assert_eq!(viewer.board_paths(&board).await.unwrap().len(), 1);

        // Owner-side edit reaches the listening viewer.
        owner
            .add_path(&board, "line 1 1 2 2".parse().unwrap())
            .await
            .unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(2) }).await;

        // Viewer-side edit goes through the owner and comes back accepted.
        let outcome = viewer
            .add_path(&board, "line 2 2 3 3".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::Forwarded);
        wait_for(|| async { owner.board_version(&board).await == Some(3) }).await;
        wait_for(|| async { viewer.board_version(&board).await == Some(3) }).await;
        assert_eq!(
            owner.board_paths(&board).await,
            viewer.board_paths(&board).await
        );

        // Undo from the viewer as well.
        viewer.undo(&board).await.unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(4) }).await;
        assert_eq!(viewer.board_paths(&board).await.unwrap().len(), 2);

        viewer.stop().await;
        owner.stop().await;
    }

    #[tokio::test]
    async fn test_stale_replica_resyncs_after_rejection() {
        let (dir_addr, _dir_shutdown) = start_directory().await;

        let owner = PeerNode::new(node_config(Some(dir_addr.clone())));
        owner.start().await.unwrap();
        let board = owner.create_board("b").await.unwrap();
        owner.share_board(&board).await.unwrap();

        let viewer = PeerNode::new(node_config(Some(dir_addr.clone())));
        viewer.start().await.unwrap();
        wait_for(|| async { viewer.boards().await.contains(&board) }).await;
        viewer.select_board(&board).await.unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(0) }).await;

        owner
            .add_path(&board, "p1".parse().unwrap())
            .await
            .unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(1) }).await;

        // Force a losing submission: write an edit carrying an old version
        // straight to the wire.
        let stale = Envelope::path_update(
            viewer.local_addr().unwrap().clone(),
            MessageKind::BoardPathUpdate,
            board.clone(),
            0,
            "stale-path".parse().unwrap(),
        );
        let owner_key = viewer.pool.ensure(board.owner()).await.unwrap();
        viewer.pool.send_to(&owner_key, &stale).await.unwrap();

        // The owner rejects it; the viewer resyncs and converges anyway.
        wait_for(|| async {
            viewer.board_version(&board).await == owner.board_version(&board).await
        })
        .await;
        let paths = owner.board_paths(&board).await.unwrap();
        assert!(!paths.iter().any(|p| p.as_str() == "stale-path"));

        viewer.stop().await;
        owner.stop().await;
    }

    #[tokio::test]
    async fn test_owner_shutdown_drops_replicas() {
        let (dir_addr, _dir_shutdown) = start_directory().await;

        let owner = PeerNode::new(node_config(Some(dir_addr.clone())));
        owner.start().await.unwrap();
        let board = owner.create_board("ephemeral").await.unwrap();
        owner.share_board(&board).await.unwrap();

        let viewer = PeerNode::new(node_config(Some(dir_addr.clone())));
        viewer.start().await.unwrap();
        wait_for(|| async { viewer.boards().await.contains(&board) }).await;
        viewer.select_board(&board).await.unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(0) }).await;

        // Owner going away takes its boards with it, via the deletion
        // notice or the dropped connection, whichever lands first.
        owner.stop().await;
        wait_for(|| async { !viewer.boards().await.contains(&board) }).await;

        viewer.stop().await;
    }

    #[tokio::test]
    async fn test_deleted_board_disappears_from_viewer() {
        let (dir_addr, _dir_shutdown) = start_directory().await;

        let owner = PeerNode::new(node_config(Some(dir_addr.clone())));
        owner.start().await.unwrap();
        let board = owner.create_board("doomed").await.unwrap();
        owner.share_board(&board).await.unwrap();

        let viewer = PeerNode::new(node_config(Some(dir_addr.clone())));
        viewer.start().await.unwrap();
        wait_for(|| async { viewer.boards().await.contains(&board) }).await;
        viewer.select_board(&board).await.unwrap();
        wait_for(|| async { viewer.board_version(&board).await == Some(0) }).await;

        owner.delete_board(&board).await.unwrap();
        wait_for(|| async { !viewer.boards().await.contains(&board) }).await;
        assert!(!owner.boards().await.contains(&board));

        viewer.stop().await;
        owner.stop().await;
    }
}
