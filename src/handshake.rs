//! HTTP upgrade handshake (RFC 6455 section 4).
//!
//! The server reads an HTTP/1.1 request head, checks that it asks for a
//! WebSocket upgrade and answers with `101 Switching Protocols` carrying the
//! accept key derived from the client's `Sec-WebSocket-Key`:
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Connection: Upgrade
//! Upgrade: websocket
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! Plain HTTP requests are refused with `426 Upgrade Required`; malformed
//! upgrade attempts with `400 Bad Request`.

use std::io;

use base64::Engine;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WS_VERSION: &str = "13";

/// Default upper bound on the size of an upgrade request head.
pub const DEFAULT_MAX_HANDSHAKE_LEN: usize = 8 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &str = "\r\n";
const KEY_LEN: usize = 16;

/// Reasons an upgrade request is refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Request does not ask for a WebSocket upgrade.
    #[error("request is not a websocket upgrade")]
    NotUpgrade,

    /// `Sec-WebSocket-Key` header absent.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// `Sec-WebSocket-Key` is not the base64 encoding of 16 bytes.
    #[error("invalid Sec-WebSocket-Key")]
    InvalidKey,

    /// `Sec-WebSocket-Version` names a version other than 13.
    #[error("unsupported websocket version: {0}")]
    UnsupportedVersion(String),

    /// Request head could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    /// Request head grew past the configured limit.
    #[error("request head exceeds {max} bytes")]
    RequestTooLarge {
        /// Configured maximum head length.
        max: usize,
    },

    /// Peer closed the stream before completing the request head.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// Transport failure while reading the request.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// HTTP response to send back before closing, if any.
    ///
    /// Transport failures get no response because the stream is unusable.
    #[must_use]
    pub fn rejection_response(&self, allow_origin: Option<&str>) -> Option<Bytes> {
        match self {
            Self::NotUpgrade => Some(upgrade_required_response(allow_origin)),
            Self::MissingKey
            | Self::InvalidKey
            | Self::UnsupportedVersion(_)
            | Self::MalformedRequest(_)
            | Self::RequestTooLarge { .. } => Some(bad_request_response(&self.to_string())),
            Self::ConnectionClosed | Self::Io(_) => None,
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// ```
/// use wsgate::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parsed HTTP/1.1 request head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Parse a request head from the front of `buf`.
    ///
    /// Returns `Ok(None)` until the blank line ending the head has arrived.
    /// On success the second element is the length of the head; any bytes
    /// after it belong to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MalformedRequest`] when the request line or
    /// a header line cannot be parsed.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, HandshakeError> {
        let Some(end) = buf
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        else {
            return Ok(None);
        };
        let head = std::str::from_utf8(&buf[..end])
            .map_err(|_| HandshakeError::MalformedRequest("request head is not UTF-8"))?;

        let mut lines = head.split(CRLF);
        let request_line = lines
            .next()
            .ok_or(HandshakeError::MalformedRequest("empty request"))?;
        let mut parts = request_line.split_ascii_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::MalformedRequest("invalid request line"));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(HandshakeError::MalformedRequest("unsupported HTTP version"));
        }

        let headers = lines
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                    .ok_or(HandshakeError::MalformedRequest("header line without colon"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((
            Self {
                method: method.to_owned(),
                path: path.to_owned(),
                headers,
            },
            end + HEAD_TERMINATOR.len(),
        )))
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &str { &self.method }

    /// Request target.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The client's `Sec-WebSocket-Key`.
    #[must_use]
    pub fn key(&self) -> Option<&str> { self.header("sec-websocket-key") }

    /// Whether `Upgrade` names `websocket` and `Connection` carries the
    /// `upgrade` token.
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        has_token(self.header("upgrade"), "websocket")
            && has_token(self.header("connection"), "upgrade")
    }
}

fn has_token(value: Option<&str>, token: &str) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Validate an upgrade request and build the `101` response.
///
/// # Errors
///
/// Returns [`HandshakeError::NotUpgrade`] for plain HTTP requests,
/// [`HandshakeError::MissingKey`] or [`HandshakeError::InvalidKey`] for a
/// bad `Sec-WebSocket-Key`, and [`HandshakeError::UnsupportedVersion`] when
/// the client asks for a version other than 13.
pub fn negotiate(request: &UpgradeRequest) -> Result<HandshakeResponse, HandshakeError> {
    if !request.is_upgrade() {
        return Err(HandshakeError::NotUpgrade);
    }
    let key = request.key().ok_or(HandshakeError::MissingKey)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| HandshakeError::InvalidKey)?;
    if decoded.len() != KEY_LEN {
        return Err(HandshakeError::InvalidKey);
    }
    if let Some(version) = request.header("sec-websocket-version")
        && version != WS_VERSION
    {
        return Err(HandshakeError::UnsupportedVersion(version.to_owned()));
    }
    Ok(HandshakeResponse {
        accept: compute_accept_key(key),
    })
}

/// Successful handshake answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResponse {
    accept: String,
}

impl HandshakeResponse {
    /// The `Sec-WebSocket-Accept` value.
    #[must_use]
    pub fn accept(&self) -> &str { &self.accept }

    /// The three header lines of the `101` response, in order.
    #[must_use]
    pub fn header_lines(&self) -> [String; 3] {
        [
            "Connection: Upgrade".to_owned(),
            "Upgrade: websocket".to_owned(),
            format!("Sec-WebSocket-Accept: {}", self.accept),
        ]
    }

    /// Complete `101 Switching Protocols` response.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::from("HTTP/1.1 101 Switching Protocols");
        for line in self.header_lines() {
            out.push_str(CRLF);
            out.push_str(&line);
        }
        out.push_str(CRLF);
        out.push_str(CRLF);
        Bytes::from(out)
    }
}

/// `426 Upgrade Required` response for plain HTTP requests.
#[must_use]
pub fn upgrade_required_response(allow_origin: Option<&str>) -> Bytes {
    const BODY: &str = "Upgrade Required";
    let mut out = String::from("HTTP/1.1 426 Upgrade Required\r\n");
    if let Some(origin) = allow_origin {
        out.push_str(&format!(
            "Access-Control-Allow-Origin: {origin}\r\nAccess-Control-Allow-Headers: *\r\n"
        ));
    }
    out.push_str(&format!(
        "Content-Type: text/plain\r\nUpgrade: websocket\r\nSec-WebSocket-Version: \
         {WS_VERSION}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{BODY}",
        BODY.len()
    ));
    Bytes::from(out)
}

/// `400 Bad Request` response carrying `reason` as its body.
#[must_use]
pub fn bad_request_response(reason: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: \
         {}\r\nConnection: close\r\n\r\n{reason}",
        reason.len()
    ))
}

/// Read an upgrade request head from `reader`.
///
/// Returns the parsed request and any bytes that arrived after the head,
/// which may already contain WebSocket frames.
///
/// # Errors
///
/// Returns [`HandshakeError::RequestTooLarge`] when no complete head fits in
/// `max_len` bytes, [`HandshakeError::ConnectionClosed`] on EOF,
/// [`HandshakeError::Io`] on transport failure, and parse errors from
/// [`UpgradeRequest::parse`].
pub async fn read_upgrade_request<R>(
    reader: &mut R,
    max_len: usize,
) -> Result<(UpgradeRequest, BytesMut), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_len.min(1024));
    loop {
        if let Some((request, used)) = UpgradeRequest::parse(&buf)? {
            if used > max_len {
                return Err(HandshakeError::RequestTooLarge { max: max_len });
            }
            let leftover = buf.split_off(used);
            return Ok((request, leftover));
        }
        if buf.len() >= max_len {
            return Err(HandshakeError::RequestTooLarge { max: max_len });
        }
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(headers: &str) -> UpgradeRequest {
        let raw = format!("GET /chat HTTP/1.1\r\nHost: localhost\r\n{headers}\r\n");
        let (req, used) = UpgradeRequest::parse(raw.as_bytes())
            .expect("request parses")
            .expect("request is complete");
        assert_eq!(used, raw.len());
        req
    }

    fn upgrade(extra: &str) -> UpgradeRequest {
        request(&format!(
            "Upgrade: websocket\r\nConnection: Upgrade\r\n{extra}"
        ))
    }

    #[test]
    fn accept_key_matches_rfc_vector() {
        assert_eq!(compute_accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn incomplete_head_needs_more_data() {
        let partial = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n";
        assert!(UpgradeRequest::parse(partial).expect("no error").is_none());
    }

    #[test]
    fn bytes_after_head_are_not_consumed() {
        let mut raw = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec();
        let head_len = raw.len();
        raw.extend_from_slice(&[0x81, 0x80]);
        let (req, used) = UpgradeRequest::parse(&raw)
            .expect("parses")
            .expect("complete");
        assert_eq!(used, head_len);
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request("sec-websocket-KEY: abc\r\n");
        assert_eq!(req.key(), Some("abc"));
        assert_eq!(req.header("HOST"), Some("localhost"));
    }

    #[rstest]
    #[case::keep_alive_list("Upgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\n", true)]
    #[case::missing_connection("Upgrade: websocket\r\n", false)]
    #[case::plain("Accept: text/html\r\n", false)]
    fn detects_upgrade_requests(#[case] headers: &str, #[case] expected: bool) {
        assert_eq!(request(headers).is_upgrade(), expected);
    }

    #[test]
    fn negotiate_produces_three_header_lines() {
        let req = upgrade(&format!("Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n"));
        let response = negotiate(&req).expect("valid upgrade");
        assert_eq!(
            response.header_lines(),
            [
                "Connection: Upgrade".to_owned(),
                "Upgrade: websocket".to_owned(),
                "Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_owned(),
            ]
        );
        let bytes = response.to_bytes();
        assert!(bytes.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(bytes.ends_with(b"\r\n\r\n"));
    }

    #[rstest]
    #[case::not_upgrade(request("Accept: */*\r\n"), "NotUpgrade")]
    #[case::missing_key(upgrade(""), "MissingKey")]
    #[case::short_key(upgrade("Sec-WebSocket-Key: c2hvcnQ=\r\n"), "InvalidKey")]
    #[case::not_base64(upgrade("Sec-WebSocket-Key: !!!\r\n"), "InvalidKey")]
    #[case::version(
        upgrade("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n"),
        "UnsupportedVersion"
    )]
    fn negotiate_rejects(#[case] req: UpgradeRequest, #[case] variant: &str) {
        let err = negotiate(&req).expect_err("handshake must fail");
        assert!(format!("{err:?}").starts_with(variant), "got {err:?}");
    }

    #[test]
    fn not_upgrade_gets_426_with_cors_headers() {
        let response = HandshakeError::NotUpgrade
            .rejection_response(Some("http://localhost:5173"))
            .expect("426 response");
        let text = std::str::from_utf8(&response).expect("ascii");
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: http://localhost:5173\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.ends_with("\r\n\r\nUpgrade Required"));
    }

    #[test]
    fn transport_errors_get_no_response() {
        assert!(HandshakeError::ConnectionClosed.rejection_response(None).is_none());
    }

    #[rstest]
    #[case::bad_request_line(&b"GET\r\n\r\n"[..])]
    #[case::bad_header(&b"GET / HTTP/1.1\r\nno-colon\r\n\r\n"[..])]
    #[case::http2(&b"GET / HTTP/2\r\n\r\n"[..])]
    fn malformed_heads_are_rejected(#[case] raw: &[u8]) {
        let err = UpgradeRequest::parse(raw).expect_err("malformed");
        assert!(matches!(err, HandshakeError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn reads_request_and_returns_leftover() {
        let mut raw = format!(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: \
             {SAMPLE_KEY}\r\n\r\n"
        )
        .into_bytes();
        raw.extend_from_slice(b"tail");
        let mut reader = raw.as_slice();

        let (req, leftover) = read_upgrade_request(&mut reader, DEFAULT_MAX_HANDSHAKE_LEN)
            .await
            .expect("request read");
        assert!(req.is_upgrade());
        assert_eq!(&leftover[..], b"tail");
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let raw = vec![b'a'; 64];
        let mut reader = raw.as_slice();
        let err = read_upgrade_request(&mut reader, 16)
            .await
            .expect_err("head too large");
        assert!(matches!(err, HandshakeError::RequestTooLarge { max: 16 }));
    }

    #[tokio::test]
    async fn eof_before_head_completes() {
        let mut reader: &[u8] = b"GET / HTTP/1.1\r\n";
        let err = read_upgrade_request(&mut reader, DEFAULT_MAX_HANDSHAKE_LEN)
            .await
            .expect_err("eof");
        assert!(matches!(err, HandshakeError::ConnectionClosed));
    }
}
