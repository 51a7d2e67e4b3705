//! Runtime control for [`WebSocketServer`].

use std::sync::Arc;

use futures::Future;
use log::warn;
use tokio::{net::TcpListener, select, signal, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    BackoffConfig,
    Bound,
    ServerError,
    WebSocketServer,
    connection::{ServeContext, spawn_connection_task},
};
use crate::dispatcher::WebSocketHandler;

impl<H: WebSocketHandler> WebSocketServer<H, Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// ```no_run
    /// use wsgate::{dispatcher::WebSocketHandler, server::WebSocketServer};
    ///
    /// struct Silent;
    /// impl WebSocketHandler for Silent {}
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), wsgate::server::ServerError> {
    /// WebSocketServer::new(Silent)
    ///     .bind(([127, 0, 0, 1], 3000).into())?
    ///     .run()
    ///     .await
    /// # }
    /// ```
    ///
    /// Attempting to run a server without binding fails to compile:
    ///
    /// ```compile_fail
    /// use wsgate::{dispatcher::WebSocketHandler, server::WebSocketServer};
    ///
    /// struct Silent;
    /// impl WebSocketHandler for Silent {}
    ///
    /// async fn try_run() {
    ///     WebSocketServer::new(Silent)
    ///         .run()
    ///         .await
    ///         .expect("unbound servers do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Never fails once bound: accept failures are logged and retried with
    /// back-off.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// On shutdown the accept loops stop, every open connection is sent a
    /// `1001 Going Away` close frame, and the call returns once all
    /// connection tasks have finished.
    ///
    /// ```
    /// use tokio::sync::oneshot;
    /// use wsgate::{dispatcher::WebSocketHandler, server::WebSocketServer};
    ///
    /// struct Silent;
    /// impl WebSocketHandler for Silent {}
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), wsgate::server::ServerError> {
    /// let server = WebSocketServer::new(Silent).bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    ///
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join server task")
    ///     .expect("server run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let WebSocketServer {
            handler,
            config,
            registry,
            workers,
            backoff,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ctx = ServeContext::new(handler, registry, config).with_shutdown(shutdown_token.clone());

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                ctx.clone(),
                tracker.clone(),
                backoff,
            ));
        }

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}

/// Accept connections until the context's shutdown token is cancelled.
///
/// Every accepted stream is served on its own tracked task. Failed accepts
/// back off exponentially; a successful accept resets the delay.
async fn accept_loop<H: WebSocketHandler>(
    listener: Arc<TcpListener>,
    ctx: ServeContext<H>,
    tracker: TaskTracker,
    backoff: BackoffConfig,
) {
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) = accept_iteration(&listener, &ctx, &tracker, &backoff, delay).await {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<H: WebSocketHandler>(
    listener: &TcpListener,
    ctx: &ServeContext<H>,
    tracker: &TaskTracker,
    backoff: &BackoffConfig,
    delay: std::time::Duration,
) -> Option<std::time::Duration> {
    select! {
        biased;

        () = ctx.shutdown_token().cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, _)) => {
                spawn_connection_task(stream, ctx.clone(), tracker);
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}
