// clipkeeper - Foreground Entry Point
// Supervises clipkeeperd and keeps the local cache in sync with it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clipkeeper::config::{settings, AppSettings};
use clipkeeper::gateway::{DaemonApi, HttpGateway, HttpProbe};
use clipkeeper::service::{ConnectionState, Supervisor};
use clipkeeper::sync::SyncCoordinator;
use tokio::sync::watch;

/// clipkeeper: clipboard history with a supervised background daemon
#[derive(Parser, Debug)]
#[command(name = "clipkeeper", version, about)]
struct Args {
    /// Settings file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not start the daemon, even if auto_start_service is set
    #[arg(long)]
    no_start: bool,
}

fn load_settings(args: &Args) -> anyhow::Result<AppSettings> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => settings::default_path()?,
    };
    let mut loaded = settings::load(&path)?;
    loaded.apply_env_overrides(|key| std::env::var(key).ok());
    tracing::debug!(path = %path.display(), ?loaded, "settings loaded");
    Ok(loaded)
}

/// Start the daemon and wait for it to answer health checks
async fn start_and_wait(supervisor: &Supervisor, timeout: Duration) {
    if let Err(e) = supervisor.start().await {
        tracing::error!("failed to start daemon: {e}");
        return;
    }
    match supervisor.wait_until_connected(timeout).await {
        Ok(()) => {
            let pid = supervisor.status().await.ok().and_then(|s| s.pid);
            tracing::info!(?pid, "daemon is ready");
        }
        Err(e) => tracing::error!("daemon failed to start: {e}"),
    }
}

/// Log every connection state change
async fn log_connection(mut states: watch::Receiver<ConnectionState>) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        match state {
            ConnectionState::Error(reason) => tracing::error!("daemon connection error: {reason}"),
            other => tracing::info!(state = ?other, "daemon connection changed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clipkeeper::logging::init();
    let args = Args::parse();
    let settings = load_settings(&args)?;

    let config = settings.supervisor_config()?;
    let startup_budget = config.health.startup.total() + Duration::from_secs(5);
    tracing::info!(
        port = config.port,
        daemon = %config.command.program.display(),
        state_dir = %config.state_dir.display(),
        "starting clipkeeper"
    );

    let probe = Arc::new(HttpProbe::new()?);
    let supervisor = Supervisor::spawn(config, probe);
    let api: Arc<dyn DaemonApi> = Arc::new(HttpGateway::new(settings.service_port)?);
    let sync = Arc::new(SyncCoordinator::new(api, settings.max_queued_ops));

    tokio::spawn(log_connection(supervisor.subscribe()));
    let follower = tokio::spawn({
        let sync = sync.clone();
        let states = supervisor.subscribe();
        async move { sync.follow(states).await }
    });

    if settings.auto_start_service && !args.no_start {
        start_and_wait(&supervisor, startup_budget).await;
        let snapshot = sync.snapshot().await;
        tracing::info!(
            history = snapshot.history.len(),
            folders = snapshot.snippets.len(),
            "cache ready"
        );
    } else {
        tracing::info!("auto start disabled, daemon not started");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    if let Err(e) = supervisor.stop().await {
        tracing::warn!("error stopping daemon: {e}");
    }
    drop(supervisor);
    follower.abort();
    Ok(())
}
