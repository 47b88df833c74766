//! Command-line entry point for the FIMP bridge.

use anyhow::Result;
use clap::Parser;
use fimp_bridge::{BridgeConfig, BridgeError, Platform};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Bridge a FIMP household to a smart-home accessory model.
#[derive(Parser, Debug)]
#[command(name = "fimp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "fimp-bridge.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "fimp_bridge=debug,fimp_cli=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = BridgeConfig::load(&args.config)?;

    // An unusable configuration disables the bridge instead of crashing
    // with a backtrace.
    let platform = match Platform::new(config) {
        Ok(platform) => platform,
        Err(BridgeError::Config(reason)) => {
            error!(%reason, "invalid configuration; shutting down the bridge");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    platform.run().await?;
    Ok(())
}
