use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipsync_adapters::{ApiClient, ClippingSource, FixtureSource, LegacyFeed};
use clipsync_sync::{SyncConfig, SyncEngine, SyncOutcome, SyncService, TickReason};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "clipsync")]
#[command(about = "Pull saved clippings into a local markdown vault")]
struct Cli {
    /// YAML config file; CLIPSYNC_* environment variables take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and print the report.
    Sync {
        /// Read clippings from a JSON file instead of the service.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Sync on a schedule until interrupted. SIGUSR1 signals user activity.
    Watch,
    /// Check the access token.
    Verify,
    /// Make the service forget what the legacy feed already delivered.
    ClearMemory,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Sync { fixture: None }) {
        Commands::Sync { fixture } => sync_once(&config, fixture).await?,
        Commands::Watch => watch(&config).await?,
        Commands::Verify => {
            let client = api_client(&config)?;
            let pong = client.ping().await?;
            println!("service reachable at {}: {pong}", client.base_url());
            let valid = client.verify_token().await?;
            println!("token valid: {valid}");
            if config.legacy_enabled {
                let status = client.verify_legacy_token().await?;
                println!(
                    "legacy feed: valid={} subscribed={}",
                    status.valid, status.subscribed
                );
            }
            if !valid {
                anyhow::bail!("access token rejected by {}", client.base_url());
            }
        }
        Commands::ClearMemory => {
            api_client(&config)?.clear_sync_memory().await?;
            println!("legacy sync memory cleared");
        }
    }

    Ok(())
}

fn api_client(config: &SyncConfig) -> Result<ApiClient> {
    anyhow::ensure!(
        !config.access_token.trim().is_empty(),
        "no access token configured (set access_token or CLIPSYNC_ACCESS_TOKEN)"
    );
    ApiClient::new(config.api_config(), config.access_token.trim())
}

async fn sync_once(config: &SyncConfig, fixture: Option<PathBuf>) -> Result<()> {
    let engine = match fixture {
        Some(path) => SyncEngine::from_config(config, Arc::new(FixtureSource::new(path)), None)?,
        None => {
            let client = Arc::new(api_client(config)?);
            let legacy: Arc<dyn LegacyFeed> = client.clone();
            SyncEngine::from_config(config, client, Some(legacy))?
        }
    };

    match engine.sync().await? {
        SyncOutcome::Completed(report) => {
            println!(
                "sync complete: run_id={} source={} fetched={} written={} skipped={} legacy={} failures={}",
                report.run_id,
                report.source,
                report.fetched,
                report.written,
                report.skipped,
                report.legacy_written,
                report.failures.len()
            );
            for failure in &report.failures {
                let path = failure
                    .path
                    .as_ref()
                    .map(|path| path.to_string())
                    .unwrap_or_else(|| "-".to_string());
                eprintln!("  failed {} ({path}): {}", failure.id, failure.reason);
            }
        }
        SyncOutcome::AlreadyRunning => println!("sync already running"),
    }
    Ok(())
}

async fn watch(config: &SyncConfig) -> Result<()> {
    let client = Arc::new(api_client(config)?);
    if !client.verify_token().await? {
        anyhow::bail!("access token rejected by {}", client.base_url());
    }

    let source: Arc<dyn ClippingSource> = client.clone();
    let legacy: Arc<dyn LegacyFeed> = client;
    let engine = Arc::new(SyncEngine::from_config(config, source, Some(legacy))?);
    engine.tick(TickReason::Startup).await;

    let service = SyncService::start(engine, config.sync_interval(), config.idle_threshold()).await?;
    info!(vault = %config.vault_dir.display(), "watching for new clippings; ctrl-c to stop");
    wait_for_shutdown(&service).await?;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_shutdown(service: &SyncService) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut activity =
        signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for ctrl-c")?;
                info!("shutting down");
                return Ok(());
            }
            _ = activity.recv() => {
                service.activity();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_service: &SyncService) -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    Ok(())
}
