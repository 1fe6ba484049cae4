//! Hook Relay - Main Entry Point

use api::{init_logging, run, Settings};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hook-relay", version, about = "Relay Alertmanager webhooks to chat targets")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "HOOK_RELAY_CONFIG", default_value = "configure.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;
    init_logging(&settings.log)?;

    info!("=== Hook Relay v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", args.config.display());

    run(settings).await
}
