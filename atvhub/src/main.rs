/*
atvhub - single-binary main.rs
Starts the Rocket HTTP server and runs the background lead scan worker in the same process.
*/

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use atvhub::leads::scan::{CronOutcome, LeadScanner};
use atvhub::server::{launch_rocket, AppState};
use atvhub::storage::KvStore;
use common::{init_db_pool, Config};

#[derive(Parser, Debug)]
#[command(name = "atvhub", about = "Addressable TV content admin + lead scan server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable background worker (run server only)
    #[arg(long)]
    no_worker: bool,

    /// Run worker only (do not bind HTTP server)
    #[arg(long)]
    worker_only: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = match args.config {
        Some(p) if !p.exists() => {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p) => Some(p),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = match Config::load_with_defaults(
        Some(&default_path).filter(|p| p.exists()).map(PathBuf::as_path),
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let db_path = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path, "resolved DB path");

    let pool = match init_db_pool(&db_path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path, "failed to initialize database pool");
            return Err(e);
        }
    };
    let kv = KvStore::new(pool);
    kv.ensure_schema().await?;

    let state = AppState::from_config(config.clone(), kv)?;
    let interval = worker_interval(&config, &state.scanner);
    let shutdown_notify = Arc::new(Notify::new());

    if args.worker_only {
        info!("Starting in worker-only mode");
        let Some(interval) = interval else {
            warn!("worker-only mode requested but the background scan is disabled");
            return Ok(());
        };
        let worker = run_worker(state.scanner.clone(), interval, shutdown_notify.clone());
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, notifying worker to shutdown");
                shutdown_notify.notify_one();
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            _ = worker => {}
        }
        info!("worker-only run finished");
        return Ok(());
    }

    let worker_handle = match (args.no_worker, interval) {
        (true, _) => {
            info!("Background worker disabled via CLI (--no-worker)");
            None
        }
        (false, None) => None,
        (false, Some(interval)) => {
            info!(minutes = interval.as_secs() / 60, "Spawning background worker task");
            let scanner = state.scanner.clone();
            let shutdown = shutdown_notify.clone();
            Some(tokio::spawn(run_worker(scanner, interval, shutdown)))
        }
    };

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(state).await {
        error!(%e, "Rocket server failed");
    }

    info!("HTTP server stopped; notifying worker to shutdown");
    shutdown_notify.notify_one();

    if let Some(handle) = worker_handle {
        match tokio::time::timeout(Duration::from_secs(20), handle).await {
            Ok(Ok(())) => info!("worker exited cleanly"),
            Ok(Err(join_err)) => error!(%join_err, "worker task panicked"),
            Err(_) => info!("Timed out waiting for worker to exit; continuing shutdown"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Interval between background cron steps, `None` when the worker has nothing to do.
fn worker_interval(config: &Config, scanner: &LeadScanner) -> Option<Duration> {
    let Some(minutes) = config.scheduler.cron_interval_minutes.filter(|m| *m > 0) else {
        info!("worker: scheduler.cron_interval_minutes not set, background scan disabled");
        return None;
    };
    if !scanner.has_analyzer() {
        warn!("worker: no AI provider configured, background scan disabled");
        return None;
    }
    Some(Duration::from_secs(minutes * 60))
}

/// Run one cron step per `interval` until `shutdown_notify` fires.
async fn run_worker(scanner: LeadScanner, interval: Duration, shutdown_notify: Arc<Notify>) {
    info!(interval_secs = interval.as_secs(), "worker: lead scan loop started");

    loop {
        select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_notify.notified() => {
                info!("worker: shutdown requested, exiting loop");
                break;
            }
        }

        match scanner.cron_step(None).await {
            Ok(CronOutcome::NoSources) => info!("worker: no sources configured"),
            Ok(CronOutcome::Step(step)) => info!(
                source = %step.source,
                articles = step.articles_found,
                new_leads = step.new_leads,
                next = %step.next_source_name,
                "worker: cron step finished"
            ),
            Err(e) => error!("worker: cron step failed: {:#}", e),
        }
    }

    info!("worker: cleanup complete");
}
