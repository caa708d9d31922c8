// clipkeeper - Daemon
// The supervised backend process: stores, HTTP API, and periodic persistence

mod persist;
mod routes;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::store::{ClipboardStore, HistoryLimits, SnippetStore};

pub use persist::{flush, Persistence};
pub use routes::{router, ApiError};

/// Stores shared by all request handlers.
///
/// Each store has its own lock: writers to one store are serialized,
/// readers run concurrently.
pub struct DaemonState {
    pub history: RwLock<ClipboardStore>,
    pub snippets: RwLock<SnippetStore>,
    started: Instant,
}

impl DaemonState {
    pub fn new(history: ClipboardStore, snippets: SnippetStore) -> Self {
        Self {
            history: RwLock::new(history),
            snippets: RwLock::new(snippets),
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Daemon startup options
#[derive(Clone, Debug)]
pub struct DaemonOptions {
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub limits: HistoryLimits,
    pub flush_interval: Duration,
}

impl DaemonOptions {
    pub fn new(port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            data_dir: data_dir.into(),
            limits: HistoryLimits::default(),
            flush_interval: Duration::from_secs(1),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Run the daemon until SIGTERM or Ctrl-C, then flush and exit.
pub async fn run(options: DaemonOptions) -> anyhow::Result<()> {
    let persistence = Persistence::new(&options.data_dir)?;
    let history = persistence.load_history(options.limits)?;
    let snippets = persistence.load_snippets()?;
    tracing::info!(
        history = history.len(),
        folders = snippets.folders().len(),
        data_dir = %persistence.dir().display(),
        "stores loaded"
    );
    let state = Arc::new(DaemonState::new(history, snippets));

    let listener = TcpListener::bind(options.addr())
        .await
        .with_context(|| format!("failed to bind {}", options.addr()))?;
    tracing::info!(addr = %options.addr(), pid = std::process::id(), "clipkeeperd listening");

    let cancel = CancellationToken::new();
    let flusher = tokio::spawn(flush_loop(
        Arc::clone(&state),
        persistence.clone(),
        options.flush_interval,
        cancel.clone(),
    ));

    let served = serve(listener, Arc::clone(&state), shutdown_signal()).await;

    cancel.cancel();
    let _ = flusher.await;
    flush(&state, &persistence)
        .await
        .context("final flush failed")?;
    tracing::info!("clipkeeperd stopped");
    served.context("server error")
}

/// Serve the API on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<DaemonState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn flush_loop(
    state: Arc<DaemonState>,
    persistence: Persistence,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = flush(&state, &persistence).await {
            tracing::error!("failed to persist stores: {e:#}");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
