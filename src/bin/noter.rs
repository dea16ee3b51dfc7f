//! noter - stage a note from stdin
//!
//! Reads stdin to EOF and publishes it into the local staging directory,
//! where the shipping daemon picks it up. On SIGINT/SIGTERM/SIGABRT the
//! partially staged note is deleted and the process exits with the signal
//! number, so a supervisor can tell an interrupted run from a failed one.

use anyhow::Context;
use clap::Parser;
use noter::config::{AppConfig, KEY_CHANNEL};
use noter::producer::Producer;
use noter::staging::{StagingStore, DEFAULT_STAGING_DIR};
use std::path::PathBuf;
use std::process;
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_CONFIG_PATH: &str = "/etc/noter/noter.cfg";

/// Stage a note from stdin for delivery
#[derive(Parser, Debug)]
#[command(name = "noter")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Staging directory
    #[arg(short, long, default_value = DEFAULT_STAGING_DIR)]
    staging_dir: PathBuf,

    /// Delivery channel, overrides the config file
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = noter::logging::init() {
        eprintln!("noter: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "staging failed");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let channel = cli
        .channel
        .unwrap_or_else(|| config.get(KEY_CHANNEL).to_string());

    let store = StagingStore::open(&cli.staging_dir)?;
    let producer = Producer::new(store, channel);

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    // SIGABRT, matching the set the staging tool has always cleaned up on
    let mut sigabrt =
        signal(SignalKind::from_raw(6)).context("failed to install SIGABRT handler")?;

    tokio::select! {
        staged = producer.stage(tokio::io::stdin()) => {
            staged.context("staging from stdin failed")?;
            Ok(())
        }
        _ = sigint.recv() => abort(&producer, 2),
        _ = sigterm.recv() => abort(&producer, 15),
        _ = sigabrt.recv() => abort(&producer, 6),
    }
}

fn abort(producer: &Producer, signum: i32) -> ! {
    tracing::warn!(signum, identity = %producer.identity(), "interrupted, cleaning up");
    if let Err(e) = producer.cleanup() {
        tracing::error!(error = %e, "cleanup failed");
    }
    process::exit(signum);
}
