//! Builder and listener binding for [`WebSocketServer`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use super::{BackoffConfig, Bound, ServerError, ServerState, Unbound, WebSocketServer};
use crate::{config::ConnectionConfig, dispatcher::WebSocketHandler, session::SessionRegistry};

impl<H: WebSocketHandler> WebSocketServer<H, Unbound> {
    /// Create a server delivering events to `handler`.
    ///
    /// The worker count defaults to the number of available CPU cores (or 1
    /// if this cannot be determined). Call [`bind`](Self::bind) before
    /// running the server.
    #[must_use]
    pub fn new(handler: H) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            handler: Arc::new(handler),
            config: ConnectionConfig::default(),
            registry: Arc::new(SessionRegistry::new()),
            workers,
            backoff: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to a fresh address.
    ///
    /// ```
    /// use std::net::{Ipv4Addr, SocketAddr};
    ///
    /// use wsgate::{dispatcher::WebSocketHandler, server::WebSocketServer};
    ///
    /// struct Silent;
    /// impl WebSocketHandler for Silent {}
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let server = WebSocketServer::new(Silent)
    ///     .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    ///     .expect("bind failed");
    /// assert!(server.local_addr().is_some());
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<WebSocketServer<H, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if configuring the listener fails.
    pub fn bind_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<WebSocketServer<H, Bound>, ServerError> {
        self.bind_to_listener(std_listener)
    }
}

impl<H: WebSocketHandler> WebSocketServer<H, Bound> {
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}

impl<H, S> WebSocketServer<H, S>
where
    H: WebSocketHandler,
    S: ServerState,
{
    fn bind_to_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<WebSocketServer<H, Bound>, ServerError> {
        let WebSocketServer {
            handler,
            config,
            registry,
            workers,
            backoff,
            ready_tx,
            ..
        } = self;

        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let tokio_listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;

        Ok(WebSocketServer {
            handler,
            config,
            registry,
            workers,
            backoff,
            ready_tx,
            state: Bound {
                listener: Arc::new(tokio_listener),
            },
        })
    }

    /// Set the number of accept loops; at least one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Limits applied to every accepted connection.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Back-off applied when `accept()` fails.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Notify `tx` once every worker has been spawned.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Share an existing registry, for example with a background task that
    /// broadcasts to every connection.
    #[must_use]
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// The registry connections are recorded in.
    #[must_use]
    pub fn session_registry(&self) -> &Arc<SessionRegistry> { &self.registry }

    /// Number of accept loops.
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Connection limits in effect.
    #[must_use]
    pub const fn connection_config(&self) -> &ConnectionConfig { &self.config }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rstest::rstest;

    use super::*;

    struct Silent;
    impl WebSocketHandler for Silent {}

    #[test]
    fn workers_are_at_least_one() {
        assert_eq!(WebSocketServer::new(Silent).workers(0).worker_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn builder_settings_survive_binding() {
        let registry = Arc::new(SessionRegistry::new());
        let server = WebSocketServer::new(Silent)
            .workers(3)
            .config(ConnectionConfig::default().with_allow_origin("http://localhost:5173"))
            .registry(Arc::clone(&registry))
            .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .expect("bind");

        assert_eq!(server.worker_count(), 3);
        assert!(Arc::ptr_eq(server.session_registry(), &registry));
        assert_eq!(
            server.connection_config().allow_origin(),
            Some("http://localhost:5173")
        );
        assert!(server.local_addr().is_some());
    }
}
