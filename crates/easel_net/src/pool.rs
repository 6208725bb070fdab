//! Connection pool — lazy, reusable connections keyed by `host:port`.
//!
//! The pool holds the write handles of all live connections, inbound and
//! outbound alike. An outbound connection to a peer is opened on first use
//! via [`ConnectionPool::ensure`] and then reused for every later message to
//! that peer. Dialing is serialized per key: concurrent callers for the
//! same peer queue behind one dial and all end up on the single winning
//! connection, so no second socket (or its read loop) ever exists for a
//! key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, warn};

use easel_core::PeerAddr;

use crate::error::NetError;
use crate::message::Envelope;
use crate::router::Outbound;
use crate::transport::{ConnKey, PeerConnection, TransportEvent, connect_to_peer};

/// Concurrency-safe registry of live peer connections.
#[derive(Clone)]
pub struct ConnectionPool {
    connections: Arc<RwLock<HashMap<ConnKey, PeerConnection>>>,
    dial_gates: Arc<Mutex<HashMap<ConnKey, Arc<Mutex<()>>>>>,
    event_tx: mpsc::Sender<TransportEvent>,
    connect_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(event_tx: mpsc::Sender<TransportEvent>, connect_timeout: Duration) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            dial_gates: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            connect_timeout,
        }
    }

    /// Track a connection (typically server-accepted) under its key.
    pub async fn insert(&self, key: ConnKey, conn: PeerConnection) {
        let mut conns = self.connections.write().await;
        if conns.insert(key.clone(), conn).is_some() {
            warn!("Replaced existing connection for {key}");
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.connections.read().await.contains_key(key)
    }

    /// Ensure a live connection to `peer` exists and return its key.
    ///
    /// Dials the peer only if no connection under its `host:port` key is
    /// already in the pool. Concurrent callers for the same key serialize
    /// on a per-key gate: exactly one dials, the rest find its connection
    /// on the recheck. A losing socket is never opened, so no spurious
    /// read loop can later report a disconnect under a live key.
    pub async fn ensure(&self, peer: &PeerAddr) -> Result<ConnKey, NetError> {
        let key: ConnKey = peer.to_string();
        if self.contains(&key).await {
            return Ok(key);
        }

        let gate = {
            let mut gates = self.dial_gates.lock().await;
            gates.entry(key.clone()).or_default().clone()
        };
        let _dialing = gate.lock().await;
        if self.contains(&key).await {
            return Ok(key);
        }

        debug!("Opening connection to {key}");
        let conn = tokio::time::timeout(
            self.connect_timeout,
            connect_to_peer(&key, self.event_tx.clone()),
        )
        .await
        .map_err(|_| NetError::Timeout(self.connect_timeout))??;

        self.connections.write().await.insert(key.clone(), conn);
        Ok(key)
    }

    /// Send one envelope to the connection under `key`.
    pub async fn send_to(&self, key: &str, envelope: &Envelope) -> Result<(), NetError> {
        let conns = self.connections.read().await;
        let conn = conns
            .get(key)
            .ok_or_else(|| NetError::UnknownPeer(key.to_string()))?;
        conn.send(envelope).await
    }

    /// Deliver a batch of outbound envelopes, each to its addressed
    /// connection. Failures are logged per destination, not propagated —
    /// one dead listener must not block fan-out to the rest.
    pub async fn send_all(&self, outbound: Vec<Outbound>) {
        let conns = self.connections.read().await;
        for out in outbound {
            match conns.get(&out.to) {
                Some(conn) => {
                    if let Err(e) = conn.send(&out.envelope).await {
                        warn!("Send to {} failed: {e}", out.to);
                    }
                }
                None => {
                    warn!("No connection for {}, dropping {:?}", out.to, out.envelope.kind);
                }
            }
        }
    }

    /// Drop the connection under `key`, closing it if still open.
    pub async fn remove(&self, key: &str) {
        let mut conns = self.connections.write().await;
        if let Some(conn) = conns.remove(key) {
            conn.close().await;
            debug!("Removed connection {key}");
        }
    }

    /// Close every connection in the pool.
    pub async fn close_all(&self) {
        let mut conns = self.connections.write().await;
        for (key, conn) in conns.drain() {
            conn.close().await;
            debug!("Closed connection {key}");
        }
    }

    pub async fn keys(&self) -> Vec<ConnKey> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
