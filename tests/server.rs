//! End-to-end behaviour of [`WebSocketServer`](wsgate::WebSocketServer).

use std::time::Duration;

use bytes::Bytes;
use tokio::{io::AsyncReadExt, net::TcpStream};
use wsgate::{
    frame::{Frame, OpCode, close},
    server::WebSocketServer,
};
use wsgate_testing::{TestResult, TestServer, WsClient};

mod common;
use common::{Journal, Relay};

/// Poll until `check` holds, giving connection tasks time to finish.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[test]
fn default_worker_count_matches_cpu_count() {
    let server = WebSocketServer::new(Relay);
    let expected = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    assert_eq!(server.worker_count(), expected);
}

#[tokio::test]
async fn text_message_is_answered() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut client = WsClient::connect(server.addr()).await?;

    client.send_text("hello").await?;
    assert_eq!(client.recv_text().await?, "hello + hi from server");

    drop(client);
    server.shutdown().await
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut alice = WsClient::connect(server.addr()).await?;
    let mut bob = WsClient::connect(server.addr()).await?;
    let mut carol = WsClient::connect(server.addr()).await?;
    let registry = server.registry().clone();
    assert!(eventually(|| registry.len() == 3).await, "all clients registered");

    alice.send_text("hi all").await?;
    assert_eq!(alice.recv_text().await?, "hi all + hi from server");
    assert_eq!(bob.recv_text().await?, "hi all");
    assert_eq!(carol.recv_text().await?, "hi all");

    drop((alice, bob, carol));
    server.shutdown().await
}

#[tokio::test]
async fn fragmented_message_is_reassembled() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut client = WsClient::connect(server.addr()).await?;

    client
        .send(Frame::new(OpCode::Text, Bytes::from_static(b"frag"), false))
        .await?;
    client.send(Frame::ping(Bytes::from_static(b"mid"))).await?;
    client
        .send(Frame::continuation(Bytes::from_static(b"mented"), true))
        .await?;

    let pong = client.next_frame().await?.ok_or("missing pong")?;
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload, Bytes::from_static(b"mid"));
    assert_eq!(client.recv_text().await?, "fragmented + hi from server");

    drop(client);
    server.shutdown().await
}

#[tokio::test]
async fn close_handshake_releases_the_session() -> TestResult {
    let journal = Journal::default();
    let server = TestServer::spawn(journal.clone()).await?;
    let mut client = WsClient::connect(server.addr()).await?;
    let registry = server.registry().clone();
    assert!(eventually(|| registry.len() == 1).await);

    client.close(close::NORMAL, "done").await?;
    let ack = client.recv_close().await?.ok_or("ack without status")?;
    assert_eq!(ack.code, close::NORMAL);
    client.expect_eof().await?;

    assert!(eventually(|| registry.is_empty()).await, "session released");
    let entries = journal.entries();
    assert_eq!(entries.len(), 2, "unexpected callbacks: {entries:?}");
    assert!(entries[0].starts_with("open:"));
    assert_eq!(entries[1], "close:1000");

    server.shutdown().await
}

#[tokio::test]
async fn protocol_violation_closes_with_1002() -> TestResult {
    let journal = Journal::default();
    let server = TestServer::spawn(journal.clone()).await?;
    let mut client = WsClient::connect(server.addr()).await?;

    // Control frames cannot be fragmented.
    client
        .send(Frame::new(OpCode::Ping, Bytes::new(), false))
        .await?;
    let frame = client.recv_close().await?.ok_or("close without status")?;
    assert_eq!(frame.code, close::PROTOCOL_ERROR);
    client.expect_eof().await?;

    let registry = server.registry().clone();
    assert!(eventually(|| registry.is_empty()).await);
    let entries = journal.entries();
    assert_eq!(entries[1..], ["error:control_frame", "close:0"]);

    server.shutdown().await
}

#[tokio::test]
async fn server_push_reaches_a_client() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut client = WsClient::connect(server.addr()).await?;
    let registry = server.registry().clone();
    assert!(eventually(|| registry.len() == 1).await);

    let id = registry.active_ids()[0];
    registry.send(id, "pushed")?;
    assert_eq!(client.recv_text().await?, "pushed");

    drop(client);
    server.shutdown().await
}

#[tokio::test]
async fn shutdown_sends_going_away() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut client = WsClient::connect(server.addr()).await?;
    let registry = server.registry().clone();
    assert!(eventually(|| registry.len() == 1).await);

    let stopping = tokio::spawn(server.shutdown());
    let frame = client.recv_close().await?.ok_or("close without status")?;
    assert_eq!(frame.code, close::GOING_AWAY);
    client.expect_eof().await?;

    stopping.await??;
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_does_not_wait_for_pending_upgrades() -> TestResult {
    let server = TestServer::spawn(Relay).await?;
    let mut idle = TcpStream::connect(server.addr()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), server.shutdown()).await??;
    let mut rest = Vec::new();
    idle.read_to_end(&mut rest).await?;
    assert!(rest.is_empty(), "no response to a request never sent");
    Ok(())
}
