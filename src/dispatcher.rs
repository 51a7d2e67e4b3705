//! Delivery of connection events to application code.
//!
//! Applications implement [`WebSocketHandler`]; every method has a no-op
//! default so only the interesting notifications need overriding. A
//! [`Dispatcher`] owns one connection's [`SessionContext`] and routes
//! [`ConnectionEvent`]s to the handler in arrival order.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;

use crate::{
    codec::ProtocolError,
    connection::ConnectionEvent,
    message::Message,
    push::{PushError, SessionHandle},
    session::{BroadcastReport, ConnectionId, SessionRegistry},
};

/// Per-connection state passed to handler callbacks.
#[derive(Clone, Debug)]
pub struct SessionContext {
    handle: SessionHandle,
    registry: Arc<SessionRegistry>,
    peer_addr: Option<SocketAddr>,
}

impl SessionContext {
    /// Bundle a connection's handle with the registry it belongs to.
    #[must_use]
    pub fn new(
        handle: SessionHandle,
        registry: Arc<SessionRegistry>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            handle,
            registry,
            peer_addr,
        }
    }

    /// This connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.handle.id() }

    /// Handle for pushing to this connection.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle { &self.handle }

    /// Registry of every connection served alongside this one.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> { &self.registry }

    /// Remote address, when the transport has one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Queue a message for this connection.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::send`].
    pub fn reply(&self, message: impl Into<Message>) -> Result<(), PushError> {
        self.handle.send(message)
    }

    /// Queue a message for every other open connection.
    #[must_use]
    pub fn broadcast_others(&self, message: &Message) -> BroadcastReport {
        self.registry.broadcast(message, Some(self.id()))
    }
}

/// Notifications an application receives for each connection.
///
/// Callbacks run on the connection's task and must not block; use the
/// [`SessionContext`] to queue replies.
pub trait WebSocketHandler: Send + Sync + 'static {
    /// The handshake completed and the connection is open.
    fn on_open(&self, _ctx: &SessionContext) {}

    /// A complete data message arrived.
    fn on_message(&self, _ctx: &SessionContext, _message: Message) {}

    /// The peer pinged. The pong has already been queued.
    fn on_ping(&self, _ctx: &SessionContext, _payload: &Bytes) {}

    /// The peer answered a ping.
    fn on_pong(&self, _ctx: &SessionContext, _payload: &Bytes) {}

    /// The connection is closing. Fires exactly once per opened connection
    /// with the peer's close payload, or an empty payload when the transport
    /// went away without one.
    fn on_close(&self, _ctx: &SessionContext, _payload: &Bytes) {}

    /// The peer broke the protocol. `on_close` follows.
    fn on_error(&self, _ctx: &SessionContext, _error: &ProtocolError) {}
}

/// Routes one connection's events to a [`WebSocketHandler`].
pub struct Dispatcher<H> {
    handler: Arc<H>,
    ctx: SessionContext,
    opened: bool,
    closed: bool,
}

impl<H: WebSocketHandler> Dispatcher<H> {
    /// Create a dispatcher for the connection described by `ctx`.
    #[must_use]
    pub fn new(handler: Arc<H>, ctx: SessionContext) -> Self {
        Self {
            handler,
            ctx,
            opened: false,
            closed: false,
        }
    }

    /// The connection's context.
    #[must_use]
    pub fn context(&self) -> &SessionContext { &self.ctx }

    /// Announce the open connection. Later calls do nothing.
    pub fn open(&mut self) {
        if !self.opened {
            self.opened = true;
            self.handler.on_open(&self.ctx);
        }
    }

    /// Deliver one event.
    pub fn dispatch(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(message) => self.handler.on_message(&self.ctx, message),
            ConnectionEvent::Ping(payload) => self.handler.on_ping(&self.ctx, &payload),
            ConnectionEvent::Pong(payload) => self.handler.on_pong(&self.ctx, &payload),
            ConnectionEvent::Close(payload) => self.close(&payload),
            ConnectionEvent::Error(error) => self.handler.on_error(&self.ctx, &error),
        }
    }

    fn close(&mut self, payload: &Bytes) {
        if self.opened && !self.closed {
            self.closed = true;
            self.handler.on_close(&self.ctx, payload);
        }
    }

    /// The connection ended. Fires `on_close` with an empty payload unless
    /// it already fired.
    pub fn finish(&mut self) { self.close(&Bytes::new()); }
}
