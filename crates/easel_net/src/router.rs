//! Message routing — dispatches inbound envelopes to registered handlers.
//!
//! Each [`MessageKind`] maps to at most one handler. A handler receives the
//! connection key the envelope arrived on plus the envelope itself, and
//! returns the set of outbound envelopes the node must send in response.
//! Returning the sends as a value (rather than writing to sockets inside the
//! handler) keeps fan-out behavior observable in tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{Envelope, MessageKind};
use crate::transport::ConnKey;

/// An envelope destined for a specific connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: ConnKey,
    pub envelope: Envelope,
}

impl Outbound {
    pub fn new(to: impl Into<ConnKey>, envelope: Envelope) -> Self {
        Self {
            to: to.into(),
            envelope,
        }
    }
}

/// Handler function type: (connection key, envelope) -> outbound envelopes.
pub type MessageHandler = Arc<
    dyn Fn(ConnKey, Envelope) -> Pin<Box<dyn Future<Output = Vec<Outbound>> + Send>>
        + Send
        + Sync,
>;

/// Routes inbound envelopes to handlers registered per message kind.
pub struct MessageRouter {
    handlers: HashMap<&'static str, MessageHandler>,
    default_handler: Option<MessageHandler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    /// Register a handler for a specific message kind.
    ///
    /// Replaces any previously registered handler for that kind.
    pub fn register<F, Fut>(&mut self, kind: MessageKind, handler: F)
    where
        F: Fn(ConnKey, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Outbound>> + Send + 'static,
    {
        let key = kind.dispatch_key();
        debug!("Registering handler for message kind: {key}");
        self.handlers
            .insert(key, Arc::new(move |conn, env| Box::pin(handler(conn, env))));
    }

    /// Register a fallback handler for kinds with no dedicated handler.
    pub fn register_default<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ConnKey, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Outbound>> + Send + 'static,
    {
        self.default_handler =
            Some(Arc::new(move |conn, env| Box::pin(handler(conn, env))));
    }

    /// Dispatch an envelope to its handler and return the resulting sends.
    pub async fn dispatch(&self, from: ConnKey, envelope: Envelope) -> Vec<Outbound> {
        let key = envelope.kind.dispatch_key();
        if let Some(handler) = self.handlers.get(key) {
            handler(from, envelope).await
        } else if let Some(default) = &self.default_handler {
            default(from, envelope).await
        } else {
            warn!("No handler registered for message kind: {key}");
            Vec::new()
        }
    }

    pub fn has_handler(&self, kind: &MessageKind) -> bool {
        self.handlers.contains_key(kind.dispatch_key())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
