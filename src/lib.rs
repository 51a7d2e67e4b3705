#![doc(html_root_url = "https://docs.rs/wsgate/latest")]
//! Public API for the `wsgate` library.
//!
//! The protocol core is sans-IO: [`frame`] and [`codec`] define RFC 6455
//! frames and their wire format, [`handshake`] validates upgrade requests,
//! and [`connection::Connection`] turns inbound bytes into
//! [`ConnectionEvent`]s and queues encoded replies. [`session`] and
//! [`push`] let any task reach live connections, [`dispatcher`] routes
//! events to an application's [`WebSocketHandler`], and [`server`] drives
//! it all over tokio TCP streams.

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod metrics;
pub mod push;
pub mod server;
pub mod session;

pub use codec::{CodecError, ProtocolError, WebSocketCodec};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use dispatcher::{Dispatcher, SessionContext, WebSocketHandler};
pub use error::{Error, Result};
pub use frame::{CloseFrame, Frame, OpCode, Role};
pub use message::Message;
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use push::{PushError, SessionHandle};
pub use server::{ServerError, WebSocketServer};
pub use session::{BroadcastReport, ConnectionId, SessionRegistry};
