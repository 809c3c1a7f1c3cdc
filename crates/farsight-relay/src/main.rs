#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use farsight_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "farsight-relay")]
#[command(about = "Farsight relay - pairs hosts and viewers by session code and forwards traffic between them")]
struct Args {
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:8765")]
    listen: SocketAddr,

    /// Seconds a new connection gets to send its first message
    #[arg(long, default_value_t = 30)]
    first_message_timeout: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    farsight_common::init_tracing_with_default(&args.log_level);

    info!("Starting farsight-relay v{}", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(
        RelayServer::bind(
            args.listen,
            Duration::from_secs(args.first_message_timeout),
        )
        .await?,
    );

    tokio::select! {
        result = server.clone().run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            server.shutdown().await;
            Ok(())
        }
    }
}
