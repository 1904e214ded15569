//! marimo-bridge CLI entry point.
//!
//! Replays recorded kernel operations through the bridge and prints the
//! resulting host calls, one JSON object per line.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use marimo_bridge::replay::{read_payloads, replay};
use marimo_bridge::BridgeConfig;

#[derive(Parser, Debug)]
#[command(name = "marimo-bridge")]
#[command(about = "Drive marimo kernel operations through the notebook bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/marimo-bridge/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recording of kernel operations (one JSON object per line)
    Replay {
        file: PathBuf,

        /// How long to let timers run after the last operation
        #[arg(long, default_value = "200")]
        settle_ms: u64,
    },

    /// Print the effective configuration
    Config,
}

fn load(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    match &cli.config {
        Some(path) => marimo_bridge::try_load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(marimo_bridge::load_config(&marimo_bridge::default_config_path())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&level)).init();

    match cli.command {
        Commands::Replay { file, settle_ms } => {
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?,
            );
            let payloads = read_payloads(reader)?;
            info!(
                "Replaying {} operation(s) from {}",
                payloads.len(),
                file.display()
            );

            let events = replay(payloads, config, Duration::from_millis(settle_ms)).await;
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
