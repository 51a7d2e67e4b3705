//! Handlers shared by the integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use wsgate::{
    Message,
    dispatcher::{SessionContext, WebSocketHandler},
    frame::CloseFrame,
};

/// Replies to every text message and forwards it to the other clients.
pub struct Relay;

impl WebSocketHandler for Relay {
    fn on_message(&self, ctx: &SessionContext, message: Message) {
        let Some(text) = message.as_text() else {
            let _ = ctx.reply(message);
            return;
        };
        let _ = ctx.broadcast_others(&message);
        let _ = ctx.reply(format!("{text} + hi from server"));
    }
}

/// Records every callback as a short string. Clones share one log.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    /// Entries recorded so far.
    pub fn entries(&self) -> Vec<String> { self.0.lock().expect("journal lock").clone() }

    fn push(&self, entry: String) { self.0.lock().expect("journal lock").push(entry); }
}

impl WebSocketHandler for Journal {
    fn on_open(&self, ctx: &SessionContext) { self.push(format!("open:{}", ctx.id())); }

    fn on_message(&self, _ctx: &SessionContext, message: Message) {
        self.push(format!("message:{}", message.as_text().unwrap_or("<binary>")));
    }

    fn on_ping(&self, _ctx: &SessionContext, payload: &Bytes) {
        self.push(format!("ping:{}", String::from_utf8_lossy(payload)));
    }

    fn on_close(&self, _ctx: &SessionContext, payload: &Bytes) {
        let code = CloseFrame::parse(payload).map_or(0, |c| c.code);
        self.push(format!("close:{code}"));
    }

    fn on_error(&self, _ctx: &SessionContext, error: &wsgate::ProtocolError) {
        self.push(format!("error:{}", error.kind()));
    }
}
