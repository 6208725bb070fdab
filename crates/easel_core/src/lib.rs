//! Easel Core — the collaborative whiteboard data model.
//!
//! This crate holds everything about boards that does not touch the network:
//! identifiers, the single-writer versioned [`Board`] document, the board
//! registry, and the lossless full-state wire encoding. The distributed layer
//! lives in `easel_net` and treats these types as its source of truth.
//!
//! # Concurrency model
//!
//! Every accepted mutation advances a board's version counter by exactly one.
//! A mutation is submitted together with the version the caller believes the
//! board is at; if that does not match the board's current version the
//! mutation is rejected and the board is left untouched. That compare-and-apply
//! step is the only concurrency-control primitive in the system — callers that
//! share a board across tasks must serialize access to it (see
//! `easel_net`, which wraps the registry in an `RwLock`).

pub mod board;
pub mod id;
pub mod logging;
pub mod registry;
pub mod wire;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use board::{Board, Mutation, VersionConflict};
pub use id::{BoardId, IdError, PathToken, PeerAddr};
pub use registry::BoardRegistry;
pub use wire::{BoardSnapshot, WireError};
