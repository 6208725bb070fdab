//! WebSocket transport — server and client connections.
//!
//! Provides the low-level WebSocket plumbing for peer-to-peer communication.
//! The server accepts incoming connections and forwards received envelopes
//! into an mpsc channel. The client connects to a remote peer and returns a
//! [`PeerConnection`] handle.
//!
//! Connections are identified by a string key: for outbound connections the
//! `host:port` identity that was dialed, for inbound connections the remote
//! socket address. The key is what listener sets and the connection pool
//! reference, so every event carries it.

use std::net::SocketAddr;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::NetError;
use crate::message::Envelope;

/// Identifies one connection in event streams, listener sets, and the pool.
pub type ConnKey = String;

/// Type alias for the write half of a server-side WebSocket.
type ServerWsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Type alias for the write half of a client-side WebSocket.
type ClientWsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Capacity of the per-connection outbound frame queue.
const OUTBOUND_BUFFER: usize = 256;

/// A handle to an active WebSocket connection with a peer.
///
/// Writes go through a bounded channel to a dedicated writer task that owns
/// the sink. Frames to one peer are delivered in the order they were
/// queued, and a slow peer backpressures only its own queue, never the
/// caller's locks. The read-half is consumed by a separate task that
/// forwards incoming envelopes to the central event channel.
pub struct PeerConnection {
    key: ConnKey,
    frame_tx: mpsc::Sender<Message>,
}

/// The write side can be either a server-accepted or client-initiated socket.
enum PeerSink {
    Server(ServerWsSink),
    Client(ClientWsSink),
}

impl PeerSink {
    async fn send(
        &mut self,
        msg: Message,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match self {
            Self::Server(sink) => sink.send(msg).await,
            Self::Client(sink) => sink.send(msg).await,
        }
    }
}

impl PeerConnection {
    /// Create a connection wrapping a server-accepted WebSocket sink.
    pub fn from_server(key: ConnKey, sink: ServerWsSink) -> Self {
        Self::spawn_writer(key, PeerSink::Server(sink))
    }

    /// Create a connection wrapping a client-initiated WebSocket sink.
    pub fn from_client(key: ConnKey, sink: ClientWsSink) -> Self {
        Self::spawn_writer(key, PeerSink::Client(sink))
    }

    fn spawn_writer(key: ConnKey, mut sink: PeerSink) -> Self {
        let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let writer_key = key.clone();
        tokio::spawn(async move {
            while let Some(msg) = frame_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!("Write to {writer_key} failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });
        Self { key, frame_tx }
    }

    /// The key this connection is tracked under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Queue an envelope for delivery.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), NetError> {
        let json = envelope.to_json()?;
        self.frame_tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| NetError::Transport(format!("Connection {} closed", self.key)))
    }

    /// Close the connection gracefully. Already queued frames drain first.
    pub async fn close(&self) {
        let _ = self.frame_tx.send(Message::Close(None)).await;
    }
}

/// An incoming event from the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new inbound connection was accepted.
    InboundConnection { key: ConnKey },
    /// An envelope was received from a peer.
    Message { key: ConnKey, envelope: Envelope },
    /// A connection terminated (clean close or failure).
    Disconnected { key: ConnKey },
}

/// A bound WebSocket server that has not started accepting yet.
///
/// Binding is split from running so callers can learn the actually bound
/// address first — a peer's advertised `host:port` identity must use the
/// real port even when the config asked for port 0.
pub struct TransportServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await.map_err(NetError::Io)?;
        let local_addr = listener.local_addr().map_err(NetError::Io)?;
        info!("WebSocket server listening on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the server is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until the shutdown signal fires.
    ///
    /// Accepted connections spawn a read-loop task that forwards received
    /// envelopes (and connection/disconnection events) into `event_tx`.
    /// Server-side `PeerConnection` handles (write sinks) are sent through
    /// `conn_tx` so the owning node can track and write to them.
    pub async fn run(
        self,
        event_tx: mpsc::Sender<TransportEvent>,
        conn_tx: mpsc::Sender<(ConnKey, PeerConnection)>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let event_tx = event_tx.clone();
                            let conn_tx = conn_tx.clone();
                            tokio::spawn(async move {
                                handle_inbound(stream, peer_addr, event_tx, conn_tx).await;
                            });
                        }
                        Err(e) => {
                            error!("TCP accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("WebSocket server on {} shutting down", self.local_addr);
                    break;
                }
            }
        }
    }
}

/// Perform the WebSocket handshake for one accepted socket and run its read
/// loop until the peer goes away.
async fn handle_inbound(
    stream: TcpStream,
    peer_addr: SocketAddr,
    event_tx: mpsc::Sender<TransportEvent>,
    conn_tx: mpsc::Sender<(ConnKey, PeerConnection)>,
) {
    let key: ConnKey = peer_addr.to_string();
    match accept_async(stream).await {
        Ok(ws_stream) => {
            let (sink, mut stream) = ws_stream.split();

            // Hand the write half to the node before reading anything, so
            // responses to the first frame have somewhere to go.
            let conn = PeerConnection::from_server(key.clone(), sink);
            let _ = conn_tx.send((key.clone(), conn)).await;
            let _ = event_tx
                .send(TransportEvent::InboundConnection { key: key.clone() })
                .await;

            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                        Ok(envelope) => {
                            let _ = event_tx
                                .send(TransportEvent::Message {
                                    key: key.clone(),
                                    envelope,
                                })
                                .await;
                        }
                        Err(e) => {
                            warn!("Bad envelope from {key}: {e}");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Peer {key} sent close");
                        break;
                    }
                    Ok(_) => {} // Ignore binary/ping/pong
                    Err(e) => {
                        debug!("Read error from {key}: {e}");
                        break;
                    }
                }
            }

            let _ = event_tx.send(TransportEvent::Disconnected { key }).await;
        }
        Err(e) => {
            error!("WebSocket accept failed for {key}: {e}");
        }
    }
}

/// Connect to a remote peer as a client.
///
/// `addr` is the peer's `host:port`; it becomes the connection key carried
/// by every event from this connection. Returns a `PeerConnection` (write
/// handle) and spawns a read-loop task that forwards incoming envelopes to
/// `event_tx`.
pub async fn connect_to_peer(
    addr: &str,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<PeerConnection, NetError> {
    let url = format!("ws://{addr}");
    let (ws_stream, _) = connect_async(&url)
        .await
        .map_err(|e| NetError::Transport(format!("Connect to {addr} failed: {e}")))?;

    let key: ConnKey = addr.to_string();
    let (sink, mut stream) = ws_stream.split();
    let conn = PeerConnection::from_client(key.clone(), sink);

    // Spawn read loop.
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                    Ok(envelope) => {
                        let _ = event_tx
                            .send(TransportEvent::Message {
                                key: key.clone(),
                                envelope,
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!("Bad envelope from {key}: {e}");
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Remote {key} sent close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Read error from {key}: {e}");
                    break;
                }
            }
        }

        let _ = event_tx.send(TransportEvent::Disconnected { key }).await;
    });

    Ok(conn)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
