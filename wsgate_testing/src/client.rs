//! Minimal WebSocket client for driving a server under test.

use std::{io, net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tokio_util::codec::Framed;
use wsgate::{
    codec::WebSocketCodec,
    frame::{CloseCode, CloseFrame, Frame, OpCode},
};

use crate::{
    TestResult,
    frames::TEST_MASK,
    handshake::{SAMPLE_KEY, read_response_head, upgrade_request},
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Client end of an upgraded connection.
pub struct WsClient {
    framed: Framed<TcpStream, WebSocketCodec>,
}

impl WsClient {
    /// Connect to `addr` and complete the upgrade handshake.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be made or the server does not answer
    /// with `101 Switching Protocols`.
    pub async fn connect(addr: SocketAddr) -> TestResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(upgrade_request("/", SAMPLE_KEY).as_bytes())
            .await?;
        let head = read_response_head(&mut stream).await?;
        if !head.starts_with("HTTP/1.1 101") {
            return Err(format!("upgrade refused: {head}").into());
        }
        Ok(Self {
            framed: Framed::new(stream, WebSocketCodec::client()),
        })
    }

    /// Send `frame` with the test mask applied.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub async fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.framed.send(frame.with_mask(TEST_MASK)).await?;
        Ok(())
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send(Frame::text(text.to_owned())).await
    }

    /// Start the close handshake.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> io::Result<()> {
        self.send(Frame::close(Some(&CloseFrame::new(code, reason))))
            .await
    }

    /// Next frame from the server, or `None` once the server hangs up.
    ///
    /// # Errors
    ///
    /// Fails if nothing arrives within five seconds or the frame is invalid.
    pub async fn next_frame(&mut self) -> TestResult<Option<Frame>> {
        match timeout(RECV_TIMEOUT, self.framed.next()).await? {
            Some(frame) => Ok(Some(frame?)),
            None => Ok(None),
        }
    }

    /// Next frame, which must be a text message.
    ///
    /// # Errors
    ///
    /// Fails if the next frame is missing or is not valid text.
    pub async fn recv_text(&mut self) -> TestResult<String> {
        let frame = self.next_frame().await?.ok_or("connection closed")?;
        if frame.opcode != OpCode::Text {
            return Err(format!("expected text, got {}", frame.opcode).into());
        }
        Ok(String::from_utf8(frame.payload.to_vec())?)
    }

    /// Next frame, which must be a close frame; returns its payload.
    ///
    /// # Errors
    ///
    /// Fails if the next frame is missing or is not a close frame.
    pub async fn recv_close(&mut self) -> TestResult<Option<CloseFrame>> {
        let frame = self.next_frame().await?.ok_or("connection closed")?;
        if frame.opcode != OpCode::Close {
            return Err(format!("expected close, got {}", frame.opcode).into());
        }
        Ok(CloseFrame::parse(&frame.payload))
    }

    /// Whether the server has hung up: the stream ends without further
    /// frames.
    ///
    /// # Errors
    ///
    /// Fails if the server keeps the connection open past the timeout.
    pub async fn expect_eof(&mut self) -> TestResult {
        match self.next_frame().await? {
            None => Ok(()),
            Some(frame) => Err(format!("expected EOF, got {} frame", frame.opcode).into()),
        }
    }
}
