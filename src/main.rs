use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info};

use ble_channel_bridge_lib::config::{AppConfig, CONFIG_FILE_NAME};
use ble_channel_bridge_lib::logging;
use ble_channel_bridge_lib::state::AppState;

#[derive(Parser)]
#[command(name = "ble-channel-bridge")]
#[command(about = "Bridges the host Bluetooth LE stack to a remote peer over JSON lines on stdio")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let config = AppConfig::load_config(&args.config).await?;
    if !args.verbose {
        logging::set_level(config.bridge.level_filter()?);
    }

    let state = AppState::new(config).await?;
    info!("Bridge ready on topic {}", state.config.channel.topic);
    state.run().await
}
