//! Raw HTTP helpers for the upgrade handshake.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Sample key from RFC 6455 section 1.3.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Accept value the server must answer [`SAMPLE_KEY`] with.
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// A complete upgrade request for `path` using `key`.
#[must_use]
pub fn upgrade_request(path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: \
         Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Read one HTTP response head, stopping right after the blank line.
///
/// Bytes are read one at a time so nothing past the head is consumed.
///
/// # Errors
///
/// Returns an I/O error if the stream fails or ends before the head does.
pub async fn read_response_head<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(reader.read_u8().await?);
    }
    String::from_utf8(head).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
