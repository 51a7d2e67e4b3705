//! Tokio-based WebSocket server.
//!
//! `WebSocketServer` spawns worker tasks to accept TCP connections, performs
//! the upgrade handshake on each stream and then drives a sans-IO
//! [`Connection`](crate::connection::Connection) for it, delivering events
//! to a shared [`WebSocketHandler`].

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{config::ConnectionConfig, dispatcher::WebSocketHandler, session::SessionRegistry};

mod backoff;
mod config;
mod connection;
pub mod error;
mod runtime;

pub use backoff::BackoffConfig;
pub use connection::{ServeContext, serve_stream};
pub use error::ServerError;

/// Tokio-based server delivering WebSocket events to a [`WebSocketHandler`].
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// (not yet bound to a TCP listener) or [`Bound`]. New servers start
/// `Unbound` and must call `bind` or `bind_listener` before running. One
/// accept loop runs per worker; every accepted connection gets its own task.
pub struct WebSocketServer<H, S = Unbound>
where
    H: WebSocketHandler,
    S: ServerState,
{
    pub(crate) handler: Arc<H>,
    pub(crate) config: ConnectionConfig,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) workers: usize,
    pub(crate) backoff: BackoffConfig,
    /// Fired once every worker has been spawned.
    ///
    /// A `oneshot::Sender` can transmit only one readiness notification, so
    /// a new sender must be provided each time the server is started.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}
