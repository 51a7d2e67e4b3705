//! Per-connection driver for [`WebSocketServer`](super::WebSocketServer).
//!
//! [`serve_stream`] owns one transport: it performs the upgrade, then moves
//! bytes between the stream and a sans-IO [`Connection`] while draining the
//! connection's [`SessionQueue`].

use std::{any::Any, io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use bytes::BytesMut;
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::{
    config::ConnectionConfig,
    connection::Connection,
    dispatcher::{Dispatcher, SessionContext, WebSocketHandler},
    frame::close,
    handshake::{HandshakeError, UpgradeRequest, read_upgrade_request},
    metrics,
    push::{Outbound, SessionHandle, SessionQueue},
    session::{ConnectionId, SessionRegistry},
};

const READ_CHUNK: usize = 4096;

/// Everything a connection task needs besides its transport.
pub struct ServeContext<H> {
    handler: Arc<H>,
    registry: Arc<SessionRegistry>,
    config: Arc<ConnectionConfig>,
    shutdown: CancellationToken,
}

impl<H> Clone for ServeContext<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H: WebSocketHandler> ServeContext<H> {
    /// Bundle a handler with the registry and limits its connections share.
    #[must_use]
    pub fn new(handler: Arc<H>, registry: Arc<SessionRegistry>, config: ConnectionConfig) -> Self {
        Self {
            handler,
            registry,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Close open connections with `1001` once `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Registry connections are recorded in.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> { &self.registry }

    /// Token that starts the close handshake on every connection.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken { &self.shutdown }
}

/// Registry entry and gauge held for as long as the connection is served.
///
/// Dropping it, including while unwinding from a handler panic, removes the
/// session.
struct RegisteredSession {
    registry: Arc<SessionRegistry>,
    id: ConnectionId,
}

impl RegisteredSession {
    fn new(registry: Arc<SessionRegistry>, handle: SessionHandle) -> Self {
        let id = handle.id();
        registry.insert(id, handle);
        metrics::inc_connections();
        Self { registry, id }
    }
}

impl Drop for RegisteredSession {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        metrics::dec_connections();
    }
}

/// Serve one WebSocket connection over `stream` until it closes.
///
/// A refused upgrade is answered with `426` or `400` and returned as
/// [`Error::Handshake`](crate::Error::Handshake); no session is registered
/// for it. After the upgrade the connection is registered, `on_open` fires,
/// and events flow to the handler until either side closes. `on_close`
/// fires exactly once and the session is unregistered before this returns.
///
/// Cancelling the shutdown token before the upgrade request arrives ends the
/// call with `Ok(())`; nothing is written and no id is reserved.
///
/// # Errors
///
/// Returns [`Error::Handshake`](crate::Error::Handshake) when the upgrade is
/// refused and [`Error::Transport`](crate::Error::Transport) when the
/// stream fails.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub async fn serve_stream<S, H>(
    mut stream: S,
    peer_addr: Option<SocketAddr>,
    ctx: ServeContext<H>,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: WebSocketHandler,
{
    let config = Arc::clone(&ctx.config);
    let read = select! {
        biased;

        () = ctx.shutdown.cancelled() => {
            debug!(?peer_addr, "shutdown before upgrade request");
            return Ok(());
        }
        read = read_request(&mut stream, &config) => read,
    };
    let (request, leftover) = match read {
        Ok(parts) => parts,
        Err(err) => return Err(reject(&mut stream, err, config.allow_origin()).await.into()),
    };

    let id = ctx.registry.register();
    let (mut conn, response) = match Connection::accept(id, &request, &config) {
        Ok(parts) => parts,
        Err(err) => return Err(reject(&mut stream, err, config.allow_origin()).await.into()),
    };
    if let Err(err) = write_all(&mut stream, &response.to_bytes()).await {
        conn.handshake_failed();
        return Err(err.into());
    }
    conn.handshake_written();
    info!(%id, path = request.path(), ?peer_addr, "websocket connection opened");

    let (mut queue, handle) =
        SessionQueue::bounded(id, conn.shared_state(), config.outbound_capacity());
    let session = RegisteredSession::new(Arc::clone(&ctx.registry), handle.clone());
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&ctx.handler),
        SessionContext::new(handle, Arc::clone(&ctx.registry), peer_addr),
    );
    dispatcher.open();

    let result = drive(
        &mut stream,
        &mut conn,
        &mut dispatcher,
        &mut queue,
        leftover,
        &ctx.shutdown,
    )
    .await;

    if conn.transport_closed() {
        queue.close();
        dispatcher.finish();
        drop(session);
    }
    if let Err(err) = stream.shutdown().await {
        debug!(%id, error = %err, "transport shutdown failed");
    }
    info!(%id, "websocket connection closed");
    result.map_err(Into::into)
}

async fn read_request<S>(
    stream: &mut S,
    config: &ConnectionConfig,
) -> Result<(UpgradeRequest, BytesMut), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let read = read_upgrade_request(stream, config.max_handshake_len());
    match timeout(config.handshake_timeout(), read).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "handshake timed out",
        ))),
    }
}

async fn reject<S>(stream: &mut S, err: HandshakeError, allow_origin: Option<&str>) -> HandshakeError
where
    S: AsyncWrite + Unpin,
{
    metrics::inc_handshake_failures();
    if let Some(response) = err.rejection_response(allow_origin)
        && let Err(write_err) = write_all(stream, &response).await
    {
        debug!(error = %write_err, "failed to write handshake rejection");
    }
    err
}

async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn drive<S, H>(
    stream: &mut S,
    conn: &mut Connection,
    dispatcher: &mut Dispatcher<H>,
    queue: &mut SessionQueue,
    mut buf: BytesMut,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: WebSocketHandler,
{
    if !buf.is_empty() {
        deliver(conn, dispatcher, &buf);
        buf.clear();
    }
    loop {
        while let Some(bytes) = conn.take_outbound() {
            stream.write_all(&bytes).await?;
        }
        stream.flush().await?;
        if conn.flushed() {
            return Ok(());
        }

        buf.reserve(READ_CHUNK);
        select! {
            read = stream.read_buf(&mut buf) => {
                if read? == 0 {
                    debug!(id = %conn.id(), "peer closed the transport");
                    return Ok(());
                }
                deliver(conn, dispatcher, &buf);
                buf.clear();
            }
            Some(item) = queue.recv() => apply(conn, item),
            () = shutdown.cancelled(), if conn.is_open() => {
                if let Err(err) = conn.close(close::GOING_AWAY, "server shutting down") {
                    debug!(id = %conn.id(), error = %err, "shutdown close skipped");
                }
            }
        }
    }
}

fn deliver<H: WebSocketHandler>(conn: &mut Connection, dispatcher: &mut Dispatcher<H>, bytes: &[u8]) {
    for event in conn.feed(bytes) {
        dispatcher.dispatch(event);
    }
}

fn apply(conn: &mut Connection, item: Outbound) {
    let result = match item {
        Outbound::Message(message) => conn.send_message(message),
        Outbound::Ping(payload) => conn.ping(payload),
        Outbound::Close { code, reason } => conn.close(code, &reason),
    };
    if let Err(err) = result {
        tracing::warn!(id = %conn.id(), error = %err, "queued item dropped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        format!("{payload:?}")
    }
}

/// Spawn a task serving one TCP connection, logging and discarding panics.
pub(super) fn spawn_connection_task<H: WebSocketHandler>(
    stream: TcpStream,
    ctx: ServeContext<H>,
    tracker: &TaskTracker,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("Failed to retrieve peer address: error={e}");
            None
        }
    };
    tracker.spawn(async move {
        let fut = AssertUnwindSafe(serve_stream(stream, peer_addr, ctx)).catch_unwind();
        match fut.await {
            Ok(Ok(())) => {}
            Ok(Err(crate::Error::Handshake(e))) => {
                warn!("handshake rejected: error={e}, peer_addr={peer_addr:?}");
            }
            Ok(Err(e)) => debug!(error = %e, ?peer_addr, "connection ended with error"),
            Err(panic) => {
                let panic_msg = panic_message(panic.as_ref());
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
                tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use rstest::{fixture, rstest};
    use tokio::{
        io::{DuplexStream, duplex},
        net::TcpListener,
        task::JoinHandle,
    };
    use tokio_util::codec::Framed;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        codec::WebSocketCodec,
        frame::{CloseFrame, Frame, OpCode},
        message::Message,
    };

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const MASK: [u8; 4] = [1, 2, 3, 4];

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn entries(&self) -> Vec<String> { self.0.lock().expect("recorder lock").clone() }
        fn push(&self, entry: String) { self.0.lock().expect("recorder lock").push(entry); }
    }

    impl WebSocketHandler for Recorder {
        fn on_open(&self, _ctx: &SessionContext) { self.push("open".into()); }

        fn on_message(&self, ctx: &SessionContext, message: Message) {
            let text = message.as_text().unwrap_or_default().to_owned();
            self.push(format!("message:{text}"));
            if text == "panic" {
                panic!("boom");
            }
            ctx.reply(format!("{text} + hi from server"))
                .expect("reply queued");
        }

        fn on_close(&self, _ctx: &SessionContext, payload: &Bytes) {
            let code = CloseFrame::parse(payload).map(|c| c.code);
            self.push(format!("close:{code:?}"));
        }
    }

    #[fixture]
    fn recorder() -> Arc<Recorder> { Arc::new(Recorder::default()) }

    fn request(key: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: \
             Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        )
    }

    async fn read_head(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            client.read_exact(&mut byte).await.expect("read response head");
            head.push(byte[0]);
        }
        String::from_utf8(head).expect("ascii head")
    }

    fn start(
        handler: Arc<Recorder>,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    ) -> (DuplexStream, JoinHandle<crate::Result<()>>) {
        let (client, server) = duplex(64 * 1024);
        let ctx = ServeContext::new(handler, registry, ConnectionConfig::default())
            .with_shutdown(shutdown);
        let task = tokio::spawn(serve_stream(server, None, ctx));
        (client, task)
    }

    async fn upgrade(client: &mut DuplexStream) {
        client
            .write_all(request(KEY).as_bytes())
            .await
            .expect("write request");
        let head = read_head(client).await;
        assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {head}");
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[rstest]
    #[tokio::test]
    async fn echoes_and_closes_cleanly(recorder: Arc<Recorder>) {
        let registry = Arc::new(SessionRegistry::new());
        let (mut client, task) = start(
            Arc::clone(&recorder),
            Arc::clone(&registry),
            CancellationToken::new(),
        );
        upgrade(&mut client).await;

        let mut framed = Framed::new(client, WebSocketCodec::client());
        framed
            .send(Frame::text("hello").with_mask(MASK))
            .await
            .expect("send text");
        let reply = framed.next().await.expect("reply").expect("decodes");
        assert_eq!(reply.opcode, OpCode::Text);
        assert_eq!(reply.payload, Bytes::from_static(b"hello + hi from server"));
        assert_eq!(registry.len(), 1);

        let close = CloseFrame::new(close::NORMAL, "bye");
        framed
            .send(Frame::close(Some(&close)).with_mask(MASK))
            .await
            .expect("send close");
        let ack = framed.next().await.expect("ack").expect("decodes");
        assert_eq!(ack.opcode, OpCode::Close);
        assert_eq!(&ack.payload[..], &[0x03, 0xe8]);

        task.await.expect("join").expect("clean close");
        assert!(registry.is_empty());
        assert_eq!(
            recorder.entries(),
            vec!["open", "message:hello", "close:Some(1000)"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn refuses_plain_http_with_426(recorder: Arc<Recorder>) {
        let registry = Arc::new(SessionRegistry::new());
        let (mut client, task) = start(
            Arc::clone(&recorder),
            Arc::clone(&registry),
            CancellationToken::new(),
        );
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .expect("write request");
        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 426"), "unexpected head: {head}");

        let err = task.await.expect("join").expect_err("refused");
        assert!(matches!(
            err,
            crate::Error::Handshake(HandshakeError::NotUpgrade)
        ));
        assert!(registry.is_empty());
        assert!(recorder.entries().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn frames_sent_with_the_request_are_processed(recorder: Arc<Recorder>) {
        let registry = Arc::new(SessionRegistry::new());
        let (mut client, task) = start(
            Arc::clone(&recorder),
            registry,
            CancellationToken::new(),
        );
        let mut first = BytesMut::from(request(KEY).as_bytes());
        crate::codec::encode_frame(&Frame::text("early").with_mask(MASK), &mut first);
        client.write_all(&first).await.expect("write request");
        let _ = read_head(&mut client).await;

        let mut framed = Framed::new(client, WebSocketCodec::client());
        let reply = framed.next().await.expect("reply").expect("decodes");
        assert_eq!(reply.payload, Bytes::from_static(b"early + hi from server"));

        drop(framed);
        task.await.expect("join").expect("eof is clean");
        assert_eq!(
            recorder.entries(),
            vec!["open", "message:early", "close:None"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn shutdown_closes_with_going_away(recorder: Arc<Recorder>) {
        let token = CancellationToken::new();
        let (mut client, task) = start(
            Arc::clone(&recorder),
            Arc::new(SessionRegistry::new()),
            token.clone(),
        );
        upgrade(&mut client).await;
        token.cancel();

        let mut framed = Framed::new(client, WebSocketCodec::client());
        let close = framed.next().await.expect("close").expect("decodes");
        assert_eq!(close.opcode, OpCode::Close);
        let parsed = CloseFrame::parse(&close.payload).expect("close payload");
        assert_eq!(parsed.code, close::GOING_AWAY);

        task.await.expect("join").expect("clean close");
        assert_eq!(recorder.entries(), vec!["open", "close:None"]);
    }

    #[test]
    #[traced_test]
    fn items_arriving_after_close_are_logged() {
        let mut conn = Connection::new(ConnectionId::new(9), &ConnectionConfig::default());
        conn.handshake_written();
        conn.close(close::NORMAL, "done").expect("open connection");

        apply(&mut conn, Outbound::Message(Message::from("late")));
        assert!(logs_contain("queued item dropped"));
        assert_eq!(conn.take_outbound().map(|b| b[0]), Some(0x88));
        assert!(!conn.has_outbound());
    }

    #[rstest]
    #[tokio::test]
    async fn shutdown_before_the_request_ends_quietly(recorder: Arc<Recorder>) {
        let token = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new());
        let (mut client, task) = start(Arc::clone(&recorder), Arc::clone(&registry), token.clone());
        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ends without waiting for the handshake timeout")
            .expect("join")
            .expect("cancelled before the upgrade");
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.expect("read to eof");
        assert!(rest.is_empty(), "nothing written: {rest:?}");
        assert_eq!(registry.register().as_u64(), 1, "no id reserved");
        assert!(recorder.entries().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn protocol_violation_closes_with_1002(recorder: Arc<Recorder>) {
        let registry = Arc::new(SessionRegistry::new());
        let (mut client, task) = start(
            Arc::clone(&recorder),
            Arc::clone(&registry),
            CancellationToken::new(),
        );
        upgrade(&mut client).await;

        // Unmasked text frame.
        client
            .write_all(&[0x81, 0x02, b'h', b'i'])
            .await
            .expect("write frame");
        let mut framed = Framed::new(client, WebSocketCodec::client());
        let close = framed.next().await.expect("close").expect("decodes");
        let parsed = CloseFrame::parse(&close.payload).expect("close payload");
        assert_eq!(parsed.code, close::PROTOCOL_ERROR);

        task.await.expect("join").expect("connection closed");
        assert!(registry.is_empty());
    }

    #[rstest]
    #[traced_test]
    #[tokio::test]
    async fn spawn_connection_task_logs_panic(recorder: Arc<Recorder>) {
        let registry = Arc::new(SessionRegistry::new());
        let tracker = TaskTracker::new();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("listener.local_addr");
        let ctx = ServeContext::new(recorder, Arc::clone(&registry), ConnectionConfig::default());

        let handle = tokio::spawn({
            let tracker = tracker.clone();
            async move {
                let (stream, _) = listener.accept().await.expect("accept");
                spawn_connection_task(stream, ctx, &tracker);
                tracker.close();
                tracker.wait().await;
            }
        });

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let peer_addr = client.local_addr().expect("client.local_addr");
        let mut bytes = BytesMut::from(request(KEY).as_bytes());
        crate::codec::encode_frame(&Frame::text("panic").with_mask(MASK), &mut bytes);
        client.write_all(&bytes).await.expect("write");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task finished")
            .expect("join connection task driver");
        assert!(registry.is_empty());

        logs_assert(|lines: &[&str]| {
            lines
                .iter()
                .find(|line| {
                    line.contains("connection task panicked")
                        && line.contains("panic=boom")
                        && line.contains(&format!("peer_addr=Some({peer_addr})"))
                })
                .map(|_| ())
                .ok_or_else(|| "panic log not found".to_string())
        });
    }

    #[test]
    fn panic_message_formats_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert!(panic_message(&5_u32).contains("Any"));
    }
}
