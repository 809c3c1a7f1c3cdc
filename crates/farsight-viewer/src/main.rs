#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::info;

use farsight_viewer::{NullPresenter, ViewerAgent, ViewerConfig};

#[derive(Parser, Debug)]
#[command(name = "farsight-viewer")]
#[command(about = "Farsight viewer - joins a session by code, shows remote frames, and forwards granted input")]
struct Args {
    /// Relay server URL
    #[arg(long, default_value = "ws://localhost:8765")]
    relay: String,

    /// Session code from the host
    #[arg(long)]
    code: String,

    /// Display scale (0.5 = half size)
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    farsight_common::init_tracing_with_default(if args.debug { "debug" } else { "info" });

    let agent = ViewerAgent::join(ViewerConfig {
        relay_url: args.relay,
        session_code: args.code,
        scale: args.scale,
    })
    .await?;

    info!("connected, waiting for screen data");
    info!("press ctrl-c to disconnect");

    let handle = agent.handle();
    let run = agent.run(NullPresenter::new());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("disconnecting");
            handle.shutdown().await;
            run.await
        }
    }
}
