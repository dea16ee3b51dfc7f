//! noterd - shipping daemon
//!
//! Runs the heartbeat loop in the foreground until SIGINT or SIGTERM. The
//! loop finishes or abandons its current heartbeat mid-flight; unshipped
//! notes simply wait in the staging directory for the next run.

use anyhow::{bail, Context};
use clap::Parser;
use noter::config::{AppConfig, KEY_SERVER_ADDR};
use noter::shipper::{
    Shipper, ShipperConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT, DEFAULT_RECONNECT_BACKOFF,
};
use noter::staging::DEFAULT_STAGING_DIR;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_CONFIG_PATH: &str = "/etc/noter/noter.cfg";

/// Ship staged notes to the receiving server
#[derive(Parser, Debug)]
#[command(name = "noterd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Staging directory
    #[arg(short, long, default_value = DEFAULT_STAGING_DIR)]
    staging_dir: PathBuf,

    /// Server address, overrides the config file
    #[arg(long)]
    server_addr: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT.as_secs())]
    heartbeat: u64,

    /// Seconds between reconnect attempts while the server is unreachable
    #[arg(long, default_value_t = DEFAULT_RECONNECT_BACKOFF.as_secs())]
    reconnect_backoff: u64,

    /// Seconds allowed for one connect attempt
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = noter::logging::init() {
        eprintln!("noterd: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "daemon failed");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let server_addr = match cli.server_addr {
        Some(addr) => addr,
        None => config.get(KEY_SERVER_ADDR).to_string(),
    };
    if server_addr.is_empty() {
        bail!("no server address configured");
    }

    let shipper_config = ShipperConfig::new(&cli.staging_dir, server_addr)
        .with_heartbeat(Duration::from_secs(cli.heartbeat))
        .with_reconnect_backoff(Duration::from_secs(cli.reconnect_backoff))
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout));
    let mut shipper = Shipper::new(shipper_config)?;

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        res = shipper.run() => res.map_err(Into::into),
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, shutting down");
            Ok(())
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
            Ok(())
        }
    }
}
