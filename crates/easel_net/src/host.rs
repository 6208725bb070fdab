//! Board hosting — serves the boards this peer owns.
//!
//! The host is the single authority for its boards: every mutation request
//! from a listener is checked and applied here, under one registry lock, so
//! concurrent submissions serialize and exactly one wins per version. An
//! accepted mutation produces one acceptance envelope back to the submitter
//! plus one broadcast envelope per other listener. A stale submission gets a
//! `BoardError` naming the board; the submitter resyncs from that.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use easel_core::{BoardId, BoardRegistry, Mutation, PeerAddr};

use crate::message::{Envelope, MessageKind, PathUpdate, VersionedRef};
use crate::router::Outbound;
use crate::transport::ConnKey;

/// Handles requests addressed to the boards this peer owns.
#[derive(Clone)]
pub struct BoardHost {
    registry: Arc<RwLock<BoardRegistry>>,
    listeners: Arc<RwLock<HashMap<BoardId, HashSet<ConnKey>>>>,
    local: Arc<OnceLock<PeerAddr>>,
}

impl BoardHost {
    pub fn new(registry: Arc<RwLock<BoardRegistry>>, local: Arc<OnceLock<PeerAddr>>) -> Self {
        Self {
            registry,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            local,
        }
    }

    fn identity(&self) -> PeerAddr {
        self.local
            .get()
            .cloned()
            .unwrap_or_else(|| PeerAddr::new("0.0.0.0", 0))
    }

    /// Handle `BoardListen`: add the connection to the board's listener set.
    pub async fn on_listen(&self, from: ConnKey, board: BoardId) -> Vec<Outbound> {
        if !self.owns(&board).await {
            return self.board_error(&from, board, "Unknown board");
        }
        let mut listeners = self.listeners.write().await;
        let added = listeners.entry(board.clone()).or_default().insert(from.clone());
        if added {
            debug!("{from} now listening on {board}");
        }
        Vec::new()
    }

    /// Handle `BoardUnlisten`: drop the connection from the listener set.
    /// Unlistening a board never listened to is a no-op.
    pub async fn on_unlisten(&self, from: ConnKey, board: BoardId) -> Vec<Outbound> {
        let mut listeners = self.listeners.write().await;
        if let Some(set) = listeners.get_mut(&board) {
            set.remove(&from);
            if set.is_empty() {
                listeners.remove(&board);
            }
            debug!("{from} stopped listening on {board}");
        }
        Vec::new()
    }

    /// Handle `GetBoardData`: reply with the full board state.
    pub async fn on_get_data(&self, from: ConnKey, board: BoardId) -> Vec<Outbound> {
        let registry = self.registry.read().await;
        match registry.get(&board).filter(|b| !b.is_remote()) {
            Some(b) => vec![Outbound::new(
                from,
                Envelope::board_data(self.identity(), &b.snapshot()),
            )],
            None => self.board_error(&from, board, "Unknown board"),
        }
    }

    /// Handle `BoardPathUpdate`: apply a path add gated on its version.
    pub async fn on_path_update(&self, from: ConnKey, update: PathUpdate) -> Vec<Outbound> {
        let PathUpdate {
            board,
            version,
            path,
        } = update;
        let mutation = Mutation::AddPath(path.clone());
        match self.apply(&board, &from, &mutation, version).await {
            ApplyResult::Accepted { listeners } => {
                let mut out = vec![Outbound::new(
                    from.clone(),
                    Envelope::path_update(
                        self.identity(),
                        MessageKind::BoardPathAccepted,
                        board.clone(),
                        version,
                        path.clone(),
                    ),
                )];
                out.extend(listeners.into_iter().filter(|l| *l != from).map(|l| {
                    Outbound::new(
                        l,
                        Envelope::path_update(
                            self.identity(),
                            MessageKind::UpdateToRemote,
                            board.clone(),
                            version,
                            path.clone(),
                        ),
                    )
                }));
                out
            }
            ApplyResult::Stale { current } => self.stale_error(&from, board, version, current),
            ApplyResult::Unknown => self.board_error(&from, board, "Unknown board"),
        }
    }

    /// Handle an undo request from a listener.
    pub async fn on_undo(&self, from: ConnKey, req: VersionedRef) -> Vec<Outbound> {
        self.versioned_mutation(
            from,
            req,
            Mutation::Undo,
            MessageKind::BoardUndoAccepted,
            MessageKind::BoardUndoUpdate,
        )
        .await
    }

    /// Handle a clear request from a listener.
    pub async fn on_clear(&self, from: ConnKey, req: VersionedRef) -> Vec<Outbound> {
        self.versioned_mutation(
            from,
            req,
            Mutation::Clear,
            MessageKind::BoardClearAccepted,
            MessageKind::BoardClearUpdate,
        )
        .await
    }

    async fn versioned_mutation(
        &self,
        from: ConnKey,
        req: VersionedRef,
        mutation: Mutation,
        accepted_kind: MessageKind,
        broadcast_kind: MessageKind,
    ) -> Vec<Outbound> {
        let VersionedRef { board, version } = req;
        match self.apply(&board, &from, &mutation, version).await {
            ApplyResult::Accepted { listeners } => {
                let mut out = vec![Outbound::new(
                    from.clone(),
                    Envelope::versioned(self.identity(), accepted_kind, board.clone(), version),
                )];
                out.extend(listeners.into_iter().filter(|l| *l != from).map(|l| {
                    Outbound::new(
                        l,
                        Envelope::versioned(
                            self.identity(),
                            broadcast_kind,
                            board.clone(),
                            version,
                        ),
                    )
                }));
                out
            }
            ApplyResult::Stale { current } => self.stale_error(&from, board, version, current),
            ApplyResult::Unknown => self.board_error(&from, board, "Unknown board"),
        }
    }

    /// Mutations the owner itself makes, fanned out to each listener.
    ///
    /// Local edits do not gate on a submitted version; the owner's board is
    /// the authority. Returns the broadcast envelopes, or `None` if the
    /// board is unknown or the mutation could not apply (undo on empty).
    pub async fn apply_local(
        &self,
        board: &BoardId,
        mutation: &Mutation,
    ) -> Option<(u64, Vec<Outbound>)> {
        let submitted = {
            let mut registry = self.registry.write().await;
            let b = registry.get_mut(board).filter(|b| !b.is_remote())?;
            let submitted = b.version();
            b.try_apply(mutation, submitted).ok()?;
            submitted
        };

        let identity = self.identity();
        let kind = match mutation {
            Mutation::AddPath(_) => MessageKind::UpdateToRemote,
            Mutation::Undo => MessageKind::BoardUndoUpdate,
            Mutation::Clear => MessageKind::BoardClearUpdate,
        };
        let out = self
            .listeners_of(board)
            .await
            .into_iter()
            .map(|l| match mutation {
                Mutation::AddPath(path) => Outbound::new(
                    l,
                    Envelope::path_update(
                        identity.clone(),
                        kind,
                        board.clone(),
                        submitted,
                        path.clone(),
                    ),
                ),
                _ => Outbound::new(
                    l,
                    Envelope::versioned(identity.clone(), kind, board.clone(), submitted),
                ),
            })
            .collect();
        Some((submitted + 1, out))
    }

    /// Envelopes telling every listener a board is gone. Clears the
    /// listener set for that board.
    pub async fn deleted_notifications(&self, board: &BoardId) -> Vec<Outbound> {
        let mut listeners = self.listeners.write().await;
        let set = listeners.remove(board).unwrap_or_default();
        info!("Board {board} deleted, notifying {} listener(s)", set.len());
        set.into_iter()
            .map(|l| {
                Outbound::new(
                    l,
                    Envelope::board_ref(self.identity(), MessageKind::BoardDeleted, board.clone()),
                )
            })
            .collect()
    }

    /// Purge a disconnected peer from every listener set.
    pub async fn handle_disconnect(&self, key: &str) {
        let mut listeners = self.listeners.write().await;
        listeners.retain(|board, set| {
            if set.remove(key) {
                debug!("Purged {key} from listeners of {board}");
            }
            !set.is_empty()
        });
    }

    pub async fn listeners_of(&self, board: &BoardId) -> Vec<ConnKey> {
        self.listeners
            .read()
            .await
            .get(board)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn owns(&self, board: &BoardId) -> bool {
        self.registry
            .read()
            .await
            .get(board)
            .is_some_and(|b| !b.is_remote())
    }

    /// Check-and-apply under the registry write lock, then capture the
    /// listener set for fan-out.
    async fn apply(
        &self,
        board: &BoardId,
        from: &str,
        mutation: &Mutation,
        submitted: u64,
    ) -> ApplyResult {
        let applied = {
            let mut registry = self.registry.write().await;
            let Some(b) = registry.get_mut(board).filter(|b| !b.is_remote()) else {
                return ApplyResult::Unknown;
            };
            b.try_apply(mutation, submitted)
        };
        match applied {
            Ok(new_version) => {
                debug!("Applied {mutation:?} from {from} to {board}, now v{new_version}");
                ApplyResult::Accepted {
                    listeners: self.listeners_of(board).await,
                }
            }
            Err(conflict) => {
                warn!("Rejected {mutation:?} from {from} on {board}: {conflict}");
                ApplyResult::Stale {
                    current: conflict.current,
                }
            }
        }
    }

    fn board_error(&self, to: &str, board: BoardId, message: &str) -> Vec<Outbound> {
        vec![Outbound::new(
            to.to_string(),
            Envelope::error_report(self.identity(), MessageKind::BoardError, Some(board), message),
        )]
    }

    fn stale_error(&self, to: &str, board: BoardId, submitted: u64, current: u64) -> Vec<Outbound> {
        self.board_error(
            to,
            board,
            &format!("Version mismatch: submitted {submitted}, board is at {current}"),
        )
    }
}

enum ApplyResult {
    Accepted { listeners: Vec<ConnKey> },
    Stale { current: u64 },
    Unknown,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
