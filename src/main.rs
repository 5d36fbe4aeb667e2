//! Demo binary: loads a [`GatewayConfig`] from an optional JSON config file,
//! layers CLI overrides on top, and runs the gateway. Logger setup mirrors
//! the teacher's `main.rs` (`env_logger::Env::default().default_filter_or`);
//! the CLI itself is `clap`-derived, per SPEC_FULL's ambient-stack notes.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use mockhttpr::config::{GatewayConfig, RawGatewayConfig};
use mockhttpr::dispatcher::Gateway;

#[derive(Parser, Debug)]
#[command(name = "mockhttpr", about = "Development-time mock API gateway")]
struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "127.0.0.1:4444")]
    bind: String,

    /// Path to a JSON gateway config file (spec.md §6). Scalar fields only —
    /// handlers, middlewares and ws handlers are always wired up in code.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to serve as the filesystem resource engine's root,
    /// overriding `fsDir` from `--config` if both are given.
    #[arg(long = "fs-dir")]
    fs_dir: Option<PathBuf>,

    /// `env_logger` filter string, e.g. "info" or "mockhttpr=debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_env = env_logger::Env::default().default_filter_or(cli.log_level.clone());
    env_logger::init_from_env(log_env);

    let mut raw = match &cli.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match RawGatewayConfig::from_json(&text) {
                Ok(raw) => raw,
                Err(e) => {
                    error!("failed to parse config {path:?}: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                error!("failed to read config {path:?}: {e}");
                std::process::exit(1);
            }
        },
        None => RawGatewayConfig::default(),
    };

    if let Some(fs_dir) = cli.fs_dir {
        raw.fs_dir = Some(fs_dir);
    }

    if raw.fs_dir.is_none() {
        info!("no fsDir configured; only custom routes will be served");
    }

    let config = GatewayConfig::from_raw(raw);
    let gateway = Gateway::new(config);

    if let Err(e) = gateway.run(&cli.bind).await {
        error!("gateway exited with error: {e}");
        std::process::exit(1);
    }
}
