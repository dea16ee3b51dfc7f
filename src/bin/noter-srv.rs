//! noter-srv - receiving server
//!
//! Binds the transfer listener and runs the background consumer in one
//! process. Both loops share a broadcast shutdown token: SIGINT or SIGTERM
//! stops the accept loop immediately and waits for the consumer to finish
//! its current iteration, while connection workers in flight are abandoned.

use anyhow::Context;
use clap::Parser;
use noter::channel::{
    database::DatabaseChannel, email::{EmailChannel, SendmailTransport}, ChannelRegistry,
    DEFAULT_CHANNEL,
};
use noter::config::{
    AppConfig, KEY_DB_PATH, KEY_DELETE_AFTER_PROCESSING, KEY_EMAIL_FROM, KEY_EMAIL_TO,
    KEY_SENDMAIL_COMMAND,
};
use noter::consumer::{Consumer, ConsumerConfig, DEFAULT_CONSUME_INTERVAL};
use noter::server::{Server, ServerConfig, DEFAULT_PORT};
use noter::staging::{StagingStore, DEFAULT_STAGING_DIR};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

const DEFAULT_CONFIG_PATH: &str = "/etc/noter/noter.cfg";
const DEFAULT_DB_PATH: &str = "/var/lib/noter/notes.db";
const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// Receive shipped notes and dispatch them to delivery channels
#[derive(Parser, Debug)]
#[command(name = "noter-srv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Staging directory
    #[arg(short, long, default_value = DEFAULT_STAGING_DIR)]
    staging_dir: PathBuf,

    /// Listening port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds between consumer iterations
    #[arg(long, default_value_t = DEFAULT_CONSUME_INTERVAL.as_secs())]
    consume_interval: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = noter::logging::init() {
        eprintln!("noter-srv: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "server failed");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let store = StagingStore::open(&cli.staging_dir)?;
    let registry = build_registry(&config, &store).context("failed to build channel registry")?;

    let server_config = ServerConfig::new(&cli.staging_dir, format!("0.0.0.0:{}", cli.port));
    let server = Server::bind(server_config).await?;

    let consumer_config = ConsumerConfig::new(&cli.staging_dir)
        .with_interval(std::time::Duration::from_secs(cli.consume_interval))
        .with_delete_after_processing(config.get_bool(KEY_DELETE_AFTER_PROCESSING));
    let consumer = Consumer::new(consumer_config, registry)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));
    let consumer_task = tokio::spawn(consumer.run(shutdown_tx.subscribe()));

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }

    // Both loops exit on the token; the consumer finishes its iteration first
    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server_task.await {
        tracing::error!(error = %e, "accept loop ended with error");
    }
    let _ = consumer_task.await;

    Ok(())
}

fn build_registry(config: &AppConfig, store: &StagingStore) -> noter::Result<ChannelRegistry> {
    let mut registry = ChannelRegistry::new();

    let db_path = match config.get(KEY_DB_PATH) {
        "" => DEFAULT_DB_PATH.to_string(),
        path => path.to_string(),
    };
    let database = DatabaseChannel::open(&db_path, store.transfer_dir())?;
    registry.register(Arc::new(database));

    let sendmail = match config.get(KEY_SENDMAIL_COMMAND) {
        "" => DEFAULT_SENDMAIL.to_string(),
        command => command.to_string(),
    };
    let transport = SendmailTransport::new(
        sendmail,
        config.get(KEY_EMAIL_FROM),
        config.get(KEY_EMAIL_TO),
    );
    registry.register(Arc::new(EmailChannel::new(Arc::new(transport))));

    registry.alias(DEFAULT_CHANNEL, noter::channel::database::CHANNEL_NAME)?;
    Ok(registry)
}
