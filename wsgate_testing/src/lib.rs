//! Utilities for exercising `wsgate` servers from tests.
//!
//! [`TestServer`] runs a [`WebSocketServer`](wsgate::WebSocketServer) on an
//! ephemeral port and [`WsClient`] speaks the client side of the protocol
//! against it, masking every frame it sends.
//!
//! ```rust,no_run
//! use wsgate::dispatcher::WebSocketHandler;
//! use wsgate_testing::{TestResult, TestServer, WsClient};
//!
//! struct Silent;
//! impl WebSocketHandler for Silent {}
//!
//! # async fn example() -> TestResult {
//! let server = TestServer::spawn(Silent).await?;
//! let mut client = WsClient::connect(server.addr()).await?;
//! client.send_text("hi").await?;
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod frames;
pub mod handshake;
pub mod server;

pub use client::WsClient;
pub use frames::{TEST_MASK, masked, masked_close, masked_text};
pub use handshake::{SAMPLE_ACCEPT, SAMPLE_KEY, read_response_head, upgrade_request};
pub use server::{TestServer, unused_listener};

/// Result type used by helpers and tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
