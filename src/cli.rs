//! Command line interface for the `wsgate` relay binary.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wsgate` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wsgate",
    version,
    about = "WebSocket chat relay: replies to each text message and forwards it to every other \
             client"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Number of accept loops; defaults to the number of CPU cores.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Largest accepted frame payload in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Largest reassembled message in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Origin advertised in CORS headers on refused upgrades.
    #[arg(long)]
    pub allow_origin: Option<String>,

    /// Serve Prometheus metrics on this address (requires the `metrics`
    /// feature).
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
