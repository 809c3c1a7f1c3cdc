#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::info;

use farsight_host::{HostAgent, HostConfig, LogInputSink, TestCardSource};

#[derive(Parser, Debug)]
#[command(name = "farsight-host")]
#[command(about = "Farsight host agent - registers with a relay and streams the local screen to a viewer")]
struct Args {
    /// Relay server URL
    #[arg(long, default_value = "ws://localhost:8765")]
    relay: String,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u16,

    /// Encoder quality (1-100)
    #[arg(long, default_value_t = 70)]
    quality: u8,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    farsight_common::init_tracing_with_default(if args.debug { "debug" } else { "info" });

    let config = HostConfig {
        relay_url: args.relay,
        fps: args.fps,
        quality: args.quality,
        ..HostConfig::default()
    };
    let (width, height) = (config.screen_width, config.screen_height);

    let agent = HostAgent::connect(config).await?;

    info!("SESSION CODE: {}", agent.session_code());
    info!("share this code with the person who will view your screen");
    info!("press ctrl-c to stop sharing");

    let handle = agent.handle();
    let run = agent.run(TestCardSource::new(width, height), LogInputSink);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("stopping");
            handle.shutdown().await;
            run.await
        }
    }
}
