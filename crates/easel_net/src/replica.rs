//! Board replication — maintains local copies of boards owned elsewhere.
//!
//! Remote boards enter the registry as version-0 stubs when the directory
//! announces them, get their real state from a `BoardData` transfer, and
//! then track the owner through incremental update broadcasts. Updates carry
//! the version they apply on top of; an update that does not match the
//! replica's version means a broadcast was missed, and the replica recovers
//! by requesting the full state again.

use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use easel_core::{Board, BoardId, BoardRegistry, BoardSnapshot, Mutation, PeerAddr};

use crate::message::{Envelope, ErrorReport, MessageKind, PathUpdate, VersionedRef};
use crate::router::Outbound;

/// Applies owner-side decisions to this peer's remote board copies.
#[derive(Clone)]
pub struct Replicator {
    registry: Arc<RwLock<BoardRegistry>>,
    local: Arc<OnceLock<PeerAddr>>,
}

impl Replicator {
    pub fn new(registry: Arc<RwLock<BoardRegistry>>, local: Arc<OnceLock<PeerAddr>>) -> Self {
        Self { registry, local }
    }

    fn identity(&self) -> PeerAddr {
        self.local
            .get()
            .cloned()
            .unwrap_or_else(|| PeerAddr::new("0.0.0.0", 0))
    }

    /// Handle `SharingBoard`: record the board as available.
    ///
    /// Our own announcements echo back from a directory replay; boards we
    /// already hold (local or remote) are left untouched.
    pub async fn on_sharing(&self, board: BoardId) -> Vec<Outbound> {
        let mut registry = self.registry.write().await;
        if !registry.contains(&board) {
            debug!("Remote board available: {board}");
            registry.insert(Board::new(board, true));
        }
        Vec::new()
    }

    /// Handle `UnsharingBoard`: forget the remote copy. Local boards are
    /// never dropped by a directory broadcast.
    pub async fn on_unsharing(&self, board: BoardId) -> Vec<Outbound> {
        let mut registry = self.registry.write().await;
        if registry.get(&board).is_some_and(|b| b.is_remote()) {
            info!("Remote board withdrawn: {board}");
            registry.remove(&board);
        }
        Vec::new()
    }

    /// Handle `BoardData`: replace the replica's state with the owner's.
    pub async fn on_board_data(&self, snapshot: BoardSnapshot) -> Vec<Outbound> {
        let mut registry = self.registry.write().await;
        let id = snapshot.id.clone();
        if !registry.contains(&id) {
            registry.insert(Board::new(id.clone(), true));
        }
        match registry.get_mut(&id) {
            Some(b) if b.is_remote() => {
                let version = snapshot.version;
                if let Err(e) = b.load_snapshot(snapshot) {
                    warn!("Discarding board data for {id}: {e}");
                } else {
                    debug!("Loaded {id} at v{version}");
                }
            }
            _ => warn!("Ignoring board data for locally owned {id}"),
        }
        Vec::new()
    }

    /// Handle an accepted or broadcast path add.
    pub async fn on_path(&self, update: PathUpdate) -> Vec<Outbound> {
        let PathUpdate {
            board,
            version,
            path,
        } = update;
        self.apply(&board, &Mutation::AddPath(path), version).await
    }

    /// Handle an accepted or broadcast undo.
    pub async fn on_undo(&self, req: VersionedRef) -> Vec<Outbound> {
        self.apply(&req.board, &Mutation::Undo, req.version).await
    }

    /// Handle an accepted or broadcast clear.
    pub async fn on_clear(&self, req: VersionedRef) -> Vec<Outbound> {
        self.apply(&req.board, &Mutation::Clear, req.version).await
    }

    /// Handle `BoardDeleted`: the owner removed the board.
    pub async fn on_deleted(&self, board: BoardId) -> Vec<Outbound> {
        let mut registry = self.registry.write().await;
        if registry.get(&board).is_some_and(|b| b.is_remote()) {
            info!("Board deleted by owner: {board}");
            registry.remove(&board);
        }
        Vec::new()
    }

    /// Handle `BoardError`: a request of ours failed at the owner.
    ///
    /// A report naming a board we replicate means our copy drove a stale
    /// request; fetch the full state to catch up.
    pub async fn on_board_error(&self, report: ErrorReport) -> Vec<Outbound> {
        let Some(board) = report.board else {
            warn!("Board error: {}", report.message);
            return Vec::new();
        };
        warn!("Board error for {board}: {}", report.message);
        let registry = self.registry.read().await;
        if registry.get(&board).is_some_and(|b| b.is_remote()) {
            drop(registry);
            self.resync(&board)
        } else {
            Vec::new()
        }
    }

    /// Apply one mutation to a replica, resyncing on any mismatch.
    async fn apply(&self, board: &BoardId, mutation: &Mutation, version: u64) -> Vec<Outbound> {
        let mut registry = self.registry.write().await;
        let Some(b) = registry.get_mut(board).filter(|b| b.is_remote()) else {
            debug!("Update for unknown remote board {board}, ignoring");
            return Vec::new();
        };
        match b.try_apply(mutation, version) {
            Ok(new_version) => {
                debug!("Replica {board} advanced to v{new_version}");
                Vec::new()
            }
            Err(conflict) => {
                warn!("Replica {board} out of step ({conflict}), resyncing");
                drop(registry);
                self.resync(board)
            }
        }
    }

    fn resync(&self, board: &BoardId) -> Vec<Outbound> {
        vec![Outbound::new(
            board.owner().to_string(),
            Envelope::board_ref(self.identity(), MessageKind::GetBoardData, board.clone()),
        )]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::PathToken;

    fn board_id(name: &str) -> BoardId {
        format!("10.0.0.9:4100:{name}").parse().unwrap()
    }

    fn token(s: &str) -> PathToken {
        s.parse().unwrap()
    }

    fn replicator() -> Replicator {
        let local = Arc::new(OnceLock::new());
        let _ = local.set("10.0.0.2:4200".parse().unwrap());
        Replicator::new(Arc::new(RwLock::new(BoardRegistry::new())), local)
    }

    async fn version_of(r: &Replicator, id: &BoardId) -> u64 {
        r.registry.read().await.get(id).unwrap().version()
    }

    // -- Availability tracking ----------------------------------------------

    #[tokio::test]
    async fn test_sharing_inserts_stub_once() {
        let r = replicator();
        let id = board_id("b");
        r.on_sharing(id.clone()).await;
        r.on_sharing(id.clone()).await;

        let registry = r.registry.read().await;
        let b = registry.get(&id).unwrap();
        assert!(b.is_remote());
        assert_eq!(b.version(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sharing_never_clobbers_local_board() {
        let r = replicator();
        let id = board_id("mine");
        r.registry
            .write()
            .await
            .insert(Board::new(id.clone(), false));

        r.on_sharing(id.clone()).await;
        assert!(!r.registry.read().await.get(&id).unwrap().is_remote());

        // Unsharing broadcasts do not drop local boards either.
        r.on_unsharing(id.clone()).await;
        assert!(r.registry.read().await.contains(&id));
    }

    // -- Full state + incremental updates (in-order tracking) ----------------

    #[tokio::test]
    async fn test_replica_tracks_owner_through_updates() {
        let r = replicator();
        let id = board_id("b");
        r.on_sharing(id.clone()).await;
        r.on_board_data(BoardSnapshot {
            id: id.clone(),
            version: 2,
            paths: vec![token("p1"), token("p2")],
        })
        .await;

        assert!(
            r.on_path(PathUpdate {
                board: id.clone(),
                version: 2,
                path: token("p3"),
            })
            .await
            .is_empty()
        );
        assert!(
            r.on_undo(VersionedRef {
                board: id.clone(),
                version: 3,
            })
            .await
            .is_empty()
        );
        assert!(
            r.on_clear(VersionedRef {
                board: id.clone(),
                version: 4,
            })
            .await
            .is_empty()
        );

        let registry = r.registry.read().await;
        let b = registry.get(&id).unwrap();
        assert_eq!(b.version(), 5);
        assert!(b.paths().is_empty());
    }

    #[tokio::test]
    async fn test_missed_update_triggers_resync() {
        let r = replicator();
        let id = board_id("b");
        r.on_sharing(id.clone()).await;

        // Replica is at v0 but the owner is already past v4.
        let out = r
            .on_path(PathUpdate {
                board: id.clone(),
                version: 4,
                path: token("p5"),
            })
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "10.0.0.9:4100");
        assert_eq!(out[0].envelope.kind, MessageKind::GetBoardData);

        // The out-of-step update was not applied.
        assert_eq!(version_of(&r, &id).await, 0);
    }

    #[tokio::test]
    async fn test_update_for_unknown_board_ignored() {
        let r = replicator();
        let out = r
            .on_path(PathUpdate {
                board: board_id("ghost"),
                version: 0,
                path: token("p"),
            })
            .await;
        assert!(out.is_empty());
    }

    // -- Removal ------------------------------------------------------------

    #[tokio::test]
    async fn test_unsharing_and_deleted_remove_replica() {
        let r = replicator();
        let a = board_id("a");
        let b = board_id("b");
        r.on_sharing(a.clone()).await;
        r.on_sharing(b.clone()).await;

        r.on_unsharing(a.clone()).await;
        r.on_deleted(b.clone()).await;
        assert!(r.registry.read().await.is_empty());
    }

    // -- Error-driven resync -------------------------------------------------

    #[tokio::test]
    async fn test_board_error_requests_fresh_state() {
        let r = replicator();
        let id = board_id("b");
        r.on_sharing(id.clone()).await;

        let out = r
            .on_board_error(ErrorReport {
                board: Some(id.clone()),
                message: "Version mismatch: submitted 1, board is at 3".into(),
            })
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].envelope.kind, MessageKind::GetBoardData);
        assert_eq!(out[0].to, "10.0.0.9:4100");
    }

    #[tokio::test]
    async fn test_board_error_without_board_is_quiet() {
        let r = replicator();
        let out = r
            .on_board_error(ErrorReport {
                board: None,
                message: "Invalid share".into(),
            })
            .await;
        assert!(out.is_empty());
    }
}
