use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camhive_bus::{CaptureHub, CommandHub};
use camhive_core::{
    load_config, CamhiveConfig, InferenceService, LogNotifier, Notifier, WebhookNotifier,
};
use camhive_provider::{create_classifier, ConsensusClassifier, WorkerPool};
use camhive_scheduler::{SqliteStore, TriggerScheduler};
use camhive_server::AppState;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::device::{handle_device_command, DeviceCommands};
use commands::trigger::request_manual_capture;

#[derive(Parser)]
#[command(name = "camhive", version, about = "camhive camera capture service")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Root directory (contains config/, data/ and logs/)"
    )]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP server and trigger scheduler")]
    Start {
        #[arg(long, help = "Override the port from server.addr")]
        port: Option<u16>,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(subcommand, about = "Manage registered devices")]
    Device(DeviceCommands),
    #[command(about = "Ask a running server to capture from a device now")]
    Trigger {
        #[arg(help = "Device ID")]
        device_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "camhive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Start { port } => start(&cli.root, port).await?,
        Commands::Validate => {
            let config = load_config(&cli.root.join("config"))?;
            println!(
                "Config valid. classifiers: {} + {}, dedupe {}, streak {}, similarity {}.",
                config.consensus.primary.name,
                config.consensus.secondary.name,
                on_off(config.inference.dedupe.enabled),
                on_off(config.inference.streak.enabled),
                on_off(config.inference.similarity.enabled),
            );
        }
        Commands::Device(cmd) => {
            let config = load_config(&cli.root.join("config"))?;
            let store = open_store(&cli.root, &config)?;
            handle_device_command(cmd, &store).await?;
        }
        Commands::Trigger { device_id } => {
            let config = load_config(&cli.root.join("config"))?;
            let record = request_manual_capture(&config.server.addr, &device_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn open_store(root: &Path, config: &CamhiveConfig) -> Result<Arc<SqliteStore>> {
    let db_path = root.join(&config.server.database);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn with_port(addr: &str, port: u16) -> String {
    match addr.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{addr}:{port}"),
    }
}

fn build_notifier(config: &CamhiveConfig) -> Result<Arc<dyn Notifier>> {
    match &config.notifier.webhook_url {
        Some(url) => {
            tracing::info!("alerts will be posted to webhook");
            Ok(Arc::new(WebhookNotifier::new(url.clone())?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

fn build_classifier(config: &CamhiveConfig) -> Result<ConsensusClassifier> {
    let consensus = &config.consensus;
    let primary = create_classifier(&consensus.primary)
        .with_context(|| format!("classifier {}", consensus.primary.name))?;
    let secondary = create_classifier(&consensus.secondary)
        .with_context(|| format!("classifier {}", consensus.secondary.name))?;

    Ok(
        ConsensusClassifier::new(primary, secondary, WorkerPool::new(consensus.worker_pool_size))
            .with_low_confidence_threshold(consensus.low_confidence_threshold)
            .with_cancel_grace(Duration::from_millis(consensus.cancel_grace_ms)),
    )
}

async fn start(root: &Path, port: Option<u16>) -> Result<()> {
    let config = load_config(&root.join("config"))?;
    let store = open_store(root, &config)?;

    let commands = CommandHub::default();
    let captures = CaptureHub::default();

    let inference = Arc::new(InferenceService::new(
        Arc::new(build_classifier(&config)?),
        store.clone(),
        build_notifier(&config)?,
        captures.clone(),
        config.inference.clone(),
    ));
    inference.set_context(config.consensus.context.as_deref());

    let scheduler = Arc::new(
        TriggerScheduler::new(store.clone(), store.clone(), Arc::new(commands.clone()))
            .with_timing(
                Duration::from_millis(config.scheduler.tick_ms),
                Duration::from_millis(config.scheduler.error_backoff_ms),
            ),
    );
    scheduler.start();

    let shutdown = CancellationToken::new();
    let state = AppState {
        inference,
        scheduler: scheduler.clone(),
        devices: store.clone(),
        commands: commands.clone(),
        captures: captures.clone(),
        stream_poll: Duration::from_millis(config.server.stream_poll_ms),
        shutdown: shutdown.clone(),
    };

    let addr = match port {
        Some(port) => with_port(&config.server.addr, port),
        None => config.server.addr.clone(),
    };
    let server_token = shutdown.clone();
    let mut server =
        tokio::spawn(async move { camhive_server::serve(state, &addr, server_token).await });

    tokio::select! {
        result = &mut server => {
            // Server exited on its own (bind failure or similar).
            scheduler.stop().await;
            return result.context("server task panicked")?;
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    commands.close();
    captures.close();
    scheduler.stop().await;

    match tokio::time::timeout(Duration::from_secs(10), server).await {
        Ok(joined) => joined.context("server task panicked")??,
        Err(_) => tracing::warn!("server did not stop within 10s, exiting anyway"),
    }
    tracing::info!("camhive stopped. Goodbye.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("Received SIGINT, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("Received SIGINT, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_port_replaces_existing_port() {
        assert_eq!(with_port("0.0.0.0:3001", 8080), "0.0.0.0:8080");
        assert_eq!(with_port("localhost", 8080), "localhost:8080");
    }

    #[test]
    fn cli_parses_device_add() {
        let cli = Cli::try_parse_from([
            "camhive", "device", "add", "cam1", "--tenant", "tenant-a", "--interval", "30",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Device(DeviceCommands::Add {
                device_id,
                tenant,
                interval,
                ..
            })) => {
                assert_eq!(device_id, "cam1");
                assert_eq!(tenant, "tenant-a");
                assert_eq!(interval, Some(30));
            }
            _ => panic!("expected device add"),
        }
    }

    #[test]
    fn open_store_creates_database_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config"))
            .unwrap();
        open_store(dir.path(), &config).unwrap();
        assert!(dir.path().join(&config.server.database).exists());
    }
}
