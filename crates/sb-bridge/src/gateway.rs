use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::connection::{ClientHandle, ConnectionState, Connections};
use crate::error::{GatewayError, Result};
use crate::protocol::ServerMessage;

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// One parsed client message on its way through middleware to a handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client: ClientHandle,
    /// The envelope's `type`.
    pub kind: String,
    /// The whole envelope, `type` included.
    pub payload: Value,
}

impl RequestContext {
    /// Decode the payload into the message type's own struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload)
            .map_err(|e| GatewayError::InvalidPayload(format!("{}: {e}", self.kind)))
    }

    pub fn reply(&self, msg: ServerMessage) -> bool {
        self.client.send(msg)
    }
}

// ---------------------------------------------------------------------------
// Handler / middleware traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &RequestContext) -> Result<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> HandlerFuture + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &RequestContext) -> Result<()> {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(move |ctx| -> HandlerFuture { Box::pin(f(ctx)) }))
}

/// Runs before dispatch. Call `next.run(ctx)` to continue; returning without
/// calling it stops processing of the message.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &RequestContext, next: Next<'_>) -> Result<()>;
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: Option<&'a Arc<dyn MessageHandler>>,
}

impl Next<'_> {
    pub async fn run(self, ctx: &RequestContext) -> Result<()> {
        match self.middleware.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        ctx,
                        Next {
                            middleware: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => match self.handler {
                Some(handler) => handler.handle(ctx).await,
                None => Err(GatewayError::UnknownMessageType(ctx.kind.clone())),
            },
        }
    }
}

pub type DisconnectCallback = Box<dyn Fn(&ClientHandle) + Send + Sync>;

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Message router between client connections and handlers.
///
/// Handlers and middleware are registered up front (`&mut self`); after that
/// the gateway is shared behind an `Arc` and only connection state changes.
pub struct Gateway {
    handlers: AHashMap<String, Arc<dyn MessageHandler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    disconnect_callbacks: Vec<DisconnectCallback>,
    connections: Connections,
    max_terminals: usize,
}

impl Gateway {
    pub fn new(connections: Connections, max_terminals: usize) -> Self {
        Self {
            handlers: AHashMap::new(),
            middleware: Vec::new(),
            disconnect_callbacks: Vec::new(),
            connections,
            max_terminals,
        }
    }

    /// Register the handler for `kind`, replacing any earlier one.
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            debug!(%kind, "handler replaced");
        }
    }

    /// Append a middleware; they run in registration order.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn on_disconnect(&mut self, callback: impl Fn(&ClientHandle) + Send + Sync + 'static) {
        self.disconnect_callbacks.push(Box::new(callback));
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Registered message types, sorted. Sent as the capabilities list.
    pub fn capabilities(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Open a connection: register it and announce capabilities.
    pub fn connect(&self) -> (ClientHandle, flume::Receiver<ServerMessage>) {
        let (client, rx) = ClientHandle::new();
        self.connections.insert(client.clone());
        client.set_state(ConnectionState::Open);
        client.send(ServerMessage::ConnectionEstablished {
            client_id: client.id(),
            capabilities: self.capabilities(),
            max_terminals: self.max_terminals,
        });
        info!(client_id = %client.id(), connections = self.connections.len(), "client connected");
        (client, rx)
    }

    /// Close a connection and run every disconnect callback. A panicking
    /// callback is logged and does not stop the others.
    pub fn disconnect(&self, client: &ClientHandle) {
        if client.is_closed() {
            return;
        }
        client.set_state(ConnectionState::Closed);
        self.connections.remove(client.id());
        for (index, callback) in self.disconnect_callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(client))).is_err() {
                error!(client_id = %client.id(), index, "disconnect callback panicked");
            }
        }
        info!(client_id = %client.id(), connections = self.connections.len(), "client disconnected");
    }

    /// Handle one text frame. Errors are reported to the client; the
    /// connection stays usable whatever happens.
    pub async fn dispatch(&self, client: &ClientHandle, text: &str) {
        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(client_id = %client.id(), "malformed message: {e}");
                client.send(GatewayError::MalformedMessage(e.to_string()).to_message(None));
                return;
            }
        };
        let Some(kind) = payload.get("type").and_then(Value::as_str).map(str::to_string) else {
            client.send(
                GatewayError::MalformedMessage("missing string field `type`".into()).to_message(None),
            );
            return;
        };

        let ctx = RequestContext {
            client: client.clone(),
            kind,
            payload,
        };
        let next = Next {
            middleware: &self.middleware,
            handler: self.handlers.get(&ctx.kind),
        };
        if let Err(e) = next.run(&ctx).await {
            debug!(client_id = %client.id(), kind = %ctx.kind, code = e.code(), "request failed: {e}");
            client.send(e.to_message(Some(&ctx.kind)));
        }
    }

    /// Best-effort fan-out. Closed or unknown connections are skipped;
    /// returns how many messages were queued.
    pub fn broadcast<I>(&self, targets: I, msg: &ServerMessage) -> usize
    where
        I: IntoIterator<Item = sb_core::types::ClientId>,
    {
        targets
            .into_iter()
            .filter(|id| self.connections.send_to(*id, msg.clone()))
            .count()
    }

    /// [`broadcast`](Self::broadcast) to every live connection.
    pub fn broadcast_all(&self, msg: &ServerMessage) -> usize {
        self.broadcast(self.connections.ids(), msg)
    }
}
