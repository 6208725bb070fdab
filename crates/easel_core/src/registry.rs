//! Board registry — one peer's view of every board it knows about.

use std::collections::HashMap;

use tracing::debug;

use crate::board::Board;
use crate::id::{BoardId, PeerAddr};

/// Registry of all boards known to one peer, both locally owned and remote
/// proxies.
///
/// Each id maps to exactly one board: an insert for an id that is already
/// present is refused rather than allowed to flip a board between local and
/// remote. The registry itself is not synchronized; `easel_net` wraps it in
/// an `RwLock` and treats check-and-mutate sequences as one critical section.
#[derive(Debug, Default)]
pub struct BoardRegistry {
    boards: HashMap<BoardId, Board>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a board. Returns false (and keeps the existing entry) if the
    /// id is already registered.
    pub fn insert(&mut self, board: Board) -> bool {
        let id = board.id().clone();
        if self.boards.contains_key(&id) {
            debug!("registry already holds {id}, insert ignored");
            return false;
        }
        self.boards.insert(id, board);
        true
    }

    pub fn remove(&mut self, id: &BoardId) -> Option<Board> {
        self.boards.remove(id)
    }

    pub fn get(&self, id: &BoardId) -> Option<&Board> {
        self.boards.get(id)
    }

    pub fn get_mut(&mut self, id: &BoardId) -> Option<&mut Board> {
        self.boards.get_mut(id)
    }

    pub fn contains(&self, id: &BoardId) -> bool {
        self.boards.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Ids of all registered boards.
    pub fn ids(&self) -> Vec<BoardId> {
        self.boards.keys().cloned().collect()
    }

    /// Ids of the boards this peer owns.
    pub fn local_ids(&self) -> Vec<BoardId> {
        self.boards
            .values()
            .filter(|b| !b.is_remote())
            .map(|b| b.id().clone())
            .collect()
    }

    /// Remove every remote board owned by the given peer, returning the
    /// removed ids. Used when the connection to that peer is lost.
    pub fn remove_owned_by(&mut self, owner: &PeerAddr) -> Vec<BoardId> {
        let doomed: Vec<BoardId> = self
            .boards
            .values()
            .filter(|b| b.is_remote() && b.id().owner() == owner)
            .map(|b| b.id().clone())
            .collect();
        for id in &doomed {
            self.boards.remove(id);
        }
        doomed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
