//! Run a server on an ephemeral port for the duration of a test.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{sync::oneshot, task::JoinHandle};
use wsgate::{
    config::ConnectionConfig,
    dispatcher::WebSocketHandler,
    server::{ServerError, WebSocketServer},
    session::SessionRegistry,
};

use crate::TestResult;

/// Create a TCP listener bound to a free local port.
///
/// # Errors
///
/// Returns any I/O error encountered while binding.
pub fn unused_listener() -> std::io::Result<StdTcpListener> {
    StdTcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
}

/// A running server plus the means to stop it.
pub struct TestServer {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Start `handler` with default limits and wait until it accepts.
    ///
    /// # Errors
    ///
    /// Fails if binding fails or the server exits before signalling
    /// readiness.
    pub async fn spawn<H: WebSocketHandler>(handler: H) -> TestResult<Self> {
        Self::spawn_with(handler, ConnectionConfig::default()).await
    }

    /// Start `handler` with `config` and wait until it accepts.
    ///
    /// # Errors
    ///
    /// See [`spawn`](Self::spawn).
    pub async fn spawn_with<H: WebSocketHandler>(
        handler: H,
        config: ConnectionConfig,
    ) -> TestResult<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let server = WebSocketServer::new(handler)
            .workers(1)
            .config(config)
            .ready_signal(ready_tx)
            .bind_listener(unused_listener()?)?;
        let addr = server.local_addr().ok_or("bound server has no address")?;
        let registry = Arc::clone(server.session_registry());
        let task = tokio::spawn(server.run_with_shutdown(async {
            let _ = stop_rx.await;
        }));
        ready_rx.await?;
        Ok(Self {
            addr,
            registry,
            stop,
            task,
        })
    }

    /// Address the server listens on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Registry of the server's live connections.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> { &self.registry }

    /// Signal shutdown and wait for every connection task to finish.
    ///
    /// # Errors
    ///
    /// Returns the server's error, or a join error if its task panicked.
    pub async fn shutdown(self) -> TestResult {
        let _ = self.stop.send(());
        self.task.await??;
        Ok(())
    }
}
