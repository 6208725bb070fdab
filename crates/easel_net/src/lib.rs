//! Networking for the peer-to-peer whiteboard.
//!
//! One [`DirectoryServer`] is the rendezvous point; every other process is
//! a [`PeerNode`] that owns boards, follows boards owned elsewhere, or
//! both. Peers talk JSON envelopes over WebSockets, with connections opened
//! lazily and reused per `host:port`.

pub mod config;
pub mod directory;
pub mod error;
pub mod host;
pub mod message;
pub mod node;
pub mod pool;
pub mod replica;
pub mod router;
pub mod transport;

pub use config::NetConfig;
pub use directory::{DirectoryServer, DirectoryState};
pub use error::NetError;
pub use host::BoardHost;
pub use message::{BoardRef, Envelope, ErrorReport, MessageKind, PathUpdate, VersionedRef};
pub use node::{EditOutcome, PeerNode};
pub use pool::ConnectionPool;
pub use replica::Replicator;
pub use router::{MessageHandler, MessageRouter, Outbound};
pub use transport::{ConnKey, PeerConnection, TransportEvent, TransportServer, connect_to_peer};
