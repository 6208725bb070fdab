//! The single-writer versioned board document.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::{BoardId, PathToken};
use crate::wire::BoardSnapshot;

/// The mutation kinds a board accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Append a path to the end of the sequence.
    AddPath(PathToken),
    /// Remove the most recently appended path.
    Undo,
    /// Remove every path.
    Clear,
}

/// The normal negative outcome of a version-gated mutation.
///
/// Not an error in the failure sense: a conflict means some other submission
/// won the race and the caller must fetch the full state and resubmit. The
/// board is guaranteed untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionConflict {
    /// The version the caller believed the board was at.
    pub submitted: u64,
    /// The board's actual current version.
    pub current: u64,
}

impl std::fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version conflict: submitted {} but board is at {}",
            self.submitted, self.current
        )
    }
}

/// A whiteboard document: an ordered sequence of opaque paths plus a
/// monotonically increasing version counter.
///
/// Exactly one peer owns each board and is the sole authority for accepting
/// its mutations. A remote board is a read/forward proxy: it is only ever
/// advanced by applying mutations echoed or broadcast by the owner, which
/// keeps replica and owner versions identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    id: BoardId,
    version: u64,
    paths: Vec<PathToken>,
    shared: bool,
    remote: bool,
}

impl Board {
    /// Create a new, empty board at version 0.
    ///
    /// `remote` marks the board as a proxy for another peer's board (created
    /// from a directory share notification) rather than a locally owned one.
    pub fn new(id: BoardId, remote: bool) -> Self {
        debug!("created board {id} (remote: {remote})");
        Self {
            id,
            version: 0,
            paths: Vec::new(),
            shared: false,
            remote,
        }
    }

    pub fn id(&self) -> &BoardId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn paths(&self) -> &[PathToken] {
        &self.paths
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Set the shared flag. Meaningful only for locally owned boards; the
    /// directory announcement is the caller's job.
    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    /// Compare-and-apply: accept `mutation` iff `submitted_version` equals
    /// the board's current version, as one atomic step.
    ///
    /// On acceptance the version advances by exactly 1 and the new version is
    /// returned. On conflict nothing changes. An `Undo` on an empty board is
    /// reported as a conflict too: there is no path to remove, so the
    /// submission cannot be what the caller believed it was.
    pub fn try_apply(
        &mut self,
        mutation: &Mutation,
        submitted_version: u64,
    ) -> Result<u64, VersionConflict> {
        let conflict = VersionConflict {
            submitted: submitted_version,
            current: self.version,
        };
        if submitted_version != self.version {
            return Err(conflict);
        }
        match mutation {
            Mutation::AddPath(path) => self.paths.push(path.clone()),
            Mutation::Undo => {
                if self.paths.pop().is_none() {
                    return Err(conflict);
                }
            }
            Mutation::Clear => self.paths.clear(),
        }
        self.version += 1;
        debug!("board {} advanced to version {}", self.id, self.version);
        Ok(self.version)
    }

    /// Produce a full-state snapshot: everything a viewer needs to
    /// reconstruct the board exactly.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            id: self.id.clone(),
            version: self.version,
            paths: self.paths.clone(),
        }
    }

    /// Replace version and paths from a full-state snapshot, as received
    /// during sync. The snapshot must be for this board.
    pub fn load_snapshot(&mut self, snapshot: BoardSnapshot) -> Result<()> {
        if snapshot.id != self.id {
            bail!(
                "snapshot for {} does not match board {}",
                snapshot.id,
                self.id
            );
        }
        self.version = snapshot.version;
        self.paths = snapshot.paths;
        debug!("board {} loaded snapshot at version {}", self.id, self.version);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn board(name: &str) -> Board {
        let id: BoardId = format!("peerX:3171:{name}").parse().unwrap();
        Board::new(id, false)
    }

    fn path(s: &str) -> PathToken {
        PathToken::new(s).unwrap()
    }

    // -----------------------------------------------------------------------
    // 1. creation
    // -----------------------------------------------------------------------

    #[test]
    fn new_board_is_empty_at_version_zero() {
        let b = board("board100");
        assert_eq!(b.version(), 0);
        assert!(b.paths().is_empty());
        assert!(!b.is_shared());
        assert!(!b.is_remote());
    }

    // -----------------------------------------------------------------------
    // 2. add path with matching version
    // -----------------------------------------------------------------------

    #[test]
    fn add_path_with_matching_version_is_accepted() {
        let mut b = board("board100");
        let p1 = path("p1");

        let v = b.try_apply(&Mutation::AddPath(p1.clone()), 0).unwrap();
        assert_eq!(v, 1);
        assert_eq!(b.version(), 1);
        assert_eq!(b.paths(), &[p1]);
    }

    // -----------------------------------------------------------------------
    // 3. version monotonicity
    // -----------------------------------------------------------------------

    #[test]
    fn accepted_mutations_increment_by_exactly_one() {
        let mut b = board("mono");
        for i in 0..10u64 {
            let v = b
                .try_apply(&Mutation::AddPath(path(&format!("p{i}"))), i)
                .unwrap();
            assert_eq!(v, i + 1);
        }
        assert_eq!(b.version(), 10);

        let v = b.try_apply(&Mutation::Undo, 10).unwrap();
        assert_eq!(v, 11);
        let v = b.try_apply(&Mutation::Clear, 11).unwrap();
        assert_eq!(v, 12);
    }

    // -----------------------------------------------------------------------
    // 4. stale submission rejected, state untouched
    // -----------------------------------------------------------------------

    #[test]
    fn stale_version_is_rejected_without_mutation() {
        let mut b = board("stale");
        b.try_apply(&Mutation::AddPath(path("p1")), 0).unwrap();

        let before = b.clone();
        let err = b
            .try_apply(&Mutation::AddPath(path("p2")), 0)
            .unwrap_err();
        assert_eq!(err, VersionConflict { submitted: 0, current: 1 });
        assert_eq!(b, before);

        // A future version is just as stale.
        let err = b.try_apply(&Mutation::Clear, 5).unwrap_err();
        assert_eq!(err.current, 1);
        assert_eq!(b, before);
    }

    // -----------------------------------------------------------------------
    // 5. competing submitters (scenario: both believe the same version)
    // -----------------------------------------------------------------------

    #[test]
    fn first_of_two_concurrent_submissions_wins() {
        let mut b = board("race");
        b.try_apply(&Mutation::AddPath(path("p1")), 0).unwrap();
        b.try_apply(&Mutation::AddPath(path("p2")), 1).unwrap();

        // Two listeners both believe version 2.
        assert_eq!(b.try_apply(&Mutation::AddPath(path("a")), 2), Ok(3));
        let err = b.try_apply(&Mutation::AddPath(path("b")), 2).unwrap_err();
        assert_eq!(err, VersionConflict { submitted: 2, current: 3 });
        assert_eq!(b.paths().len(), 3);
    }

    // -----------------------------------------------------------------------
    // 6. undo
    // -----------------------------------------------------------------------

    #[test]
    fn undo_removes_most_recent_path() {
        let mut b = board("undo");
        let p1 = path("p1");
        b.try_apply(&Mutation::AddPath(p1.clone()), 0).unwrap();
        b.try_apply(&Mutation::AddPath(path("p2")), 1).unwrap();

        b.try_apply(&Mutation::Undo, 2).unwrap();
        assert_eq!(b.paths(), &[p1]);
        assert_eq!(b.version(), 3);
    }

    #[test]
    fn undo_on_empty_board_is_rejected() {
        let mut b = board("undo-empty");
        let err = b.try_apply(&Mutation::Undo, 0).unwrap_err();
        assert_eq!(err, VersionConflict { submitted: 0, current: 0 });
        assert_eq!(b.version(), 0);
    }

    // -----------------------------------------------------------------------
    // 7. clear
    // -----------------------------------------------------------------------

    #[test]
    fn clear_empties_the_path_sequence() {
        let mut b = board("clear");
        b.try_apply(&Mutation::AddPath(path("p1")), 0).unwrap();
        b.try_apply(&Mutation::AddPath(path("p2")), 1).unwrap();

        b.try_apply(&Mutation::Clear, 2).unwrap();
        assert!(b.paths().is_empty());
        assert_eq!(b.version(), 3);

        // Clearing an already-empty board is still a version bump.
        b.try_apply(&Mutation::Clear, 3).unwrap();
        assert_eq!(b.version(), 4);
    }

    // -----------------------------------------------------------------------
    // 8. snapshot / load
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_load_recovers_board_exactly() {
        let mut b = board("snap");
        b.try_apply(&Mutation::AddPath(path("p1")), 0).unwrap();
        b.try_apply(&Mutation::AddPath(path("p2")), 1).unwrap();

        let mut replica = Board::new(b.id().clone(), true);
        replica.load_snapshot(b.snapshot()).unwrap();
        assert_eq!(replica.version(), b.version());
        assert_eq!(replica.paths(), b.paths());
        assert!(replica.is_remote());
    }

    #[test]
    fn load_snapshot_rejects_wrong_board() {
        let mut b = board("one");
        let other = board("two");
        assert!(b.load_snapshot(other.snapshot()).is_err());
    }

    // -----------------------------------------------------------------------
    // 9. remote stub
    // -----------------------------------------------------------------------

    #[test]
    fn remote_stub_starts_empty_and_advances_like_the_owner() {
        let id: BoardId = "owner:9000:shared".parse().unwrap();
        let mut stub = Board::new(id, true);
        assert!(stub.is_remote());
        assert_eq!(stub.version(), 0);

        // Applying the owner's accepted echo keeps versions identical.
        stub.try_apply(&Mutation::AddPath(path("p1")), 0).unwrap();
        assert_eq!(stub.version(), 1);
    }
}
