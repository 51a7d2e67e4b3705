//! `wsgate` chat relay.
//!
//! Every text message is answered with `"<text> + hi from server"` and
//! forwarded unchanged to all other connected clients.

mod cli;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wsgate::{
    Message,
    config::ConnectionConfig,
    dispatcher::{SessionContext, WebSocketHandler},
    server::WebSocketServer,
};

struct ChatRelay;

impl WebSocketHandler for ChatRelay {
    fn on_open(&self, ctx: &SessionContext) {
        info!(id = %ctx.id(), peer = ?ctx.peer_addr(), "client joined");
    }

    fn on_message(&self, ctx: &SessionContext, message: Message) {
        let Some(text) = message.as_text() else {
            return;
        };
        let report = ctx.broadcast_others(&message);
        for (id, err) in &report.failed {
            warn!(%id, error = %err, "relay to client failed");
        }
        if let Err(err) = ctx.reply(format!("{text} + hi from server")) {
            warn!(id = %ctx.id(), error = %err, "reply failed");
        }
    }

    fn on_close(&self, ctx: &SessionContext, _payload: &bytes::Bytes) {
        info!(id = %ctx.id(), "client left");
    }
}

fn connection_config(cli: &cli::Cli) -> ConnectionConfig {
    let mut config = ConnectionConfig::default();
    if let Some(size) = cli.max_frame_size {
        config = config.with_max_frame_size(size);
    }
    if let Some(size) = cli.max_message_size {
        config = config.with_max_message_size(size);
    }
    if let Some(origin) = &cli.allow_origin {
        config = config.with_allow_origin(origin.clone());
    }
    config
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "serving metrics");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    warn!(%addr, "built without the metrics feature; ignoring --metrics-addr");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = cli::Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }

    let mut server = WebSocketServer::new(ChatRelay).config(connection_config(&cli));
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    let server = server.bind(cli.bind)?;
    if let Some(addr) = server.local_addr() {
        info!(%addr, "listening");
    }
    server.run().await?;
    Ok(())
}
