// clipkeeper - Foreground Sync
// Cached daemon state, reconciliation on reconnect, and the offline write queue

use std::collections::VecDeque;
use std::sync::Arc;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, Notify, RwLock};

use crate::api::{CaptureRequest, CreateSnippetRequest, SnippetExport};
use crate::backoff::Backoff;
use crate::error::{GatewayError, SyncError};
use crate::gateway::DaemonApi;
use crate::model::{ClipItem, SnippetFolder};
use crate::service::ConnectionState;
use crate::store::SnippetPatch;

/// Default bound on writes held while the daemon is unreachable
pub const DEFAULT_MAX_QUEUED: usize = 64;

/// A write issued by the foreground.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Capture(CaptureRequest),
    DeleteHistoryItem { id: String },
    ClearHistory,
    CreateSnippet(CreateSnippetRequest),
    UpdateSnippet {
        folder: String,
        id: String,
        patch: SnippetPatch,
    },
    DeleteSnippet { folder: String, id: String },
    MoveSnippet { from: String, id: String, to: String },
    CreateFolder { name: String },
    RenameFolder { name: String, new_name: String },
    DeleteFolder { name: String },
    ImportSnippets(SnippetExport),
}

/// Which cached view a mutation invalidates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    History,
    Snippets,
}

impl Mutation {
    fn scope(&self) -> Scope {
        match self {
            Mutation::Capture(_) | Mutation::DeleteHistoryItem { .. } | Mutation::ClearHistory => {
                Scope::History
            }
            _ => Scope::Snippets,
        }
    }

    async fn apply(&self, api: &dyn DaemonApi) -> Result<(), GatewayError> {
        match self {
            Mutation::Capture(request) => api.capture(request).await.map(|_| ()),
            Mutation::DeleteHistoryItem { id } => api.delete_history_item(id).await,
            Mutation::ClearHistory => api.clear_history().await,
            Mutation::CreateSnippet(request) => api.create_snippet(request).await.map(|_| ()),
            Mutation::UpdateSnippet { folder, id, patch } => {
                api.update_snippet(folder, id, patch).await.map(|_| ())
            }
            Mutation::DeleteSnippet { folder, id } => api.delete_snippet(folder, id).await,
            Mutation::MoveSnippet { from, id, to } => {
                api.move_snippet(from, id, to).await.map(|_| ())
            }
            Mutation::CreateFolder { name } => api.create_folder(name).await.map(|_| ()),
            Mutation::RenameFolder { name, new_name } => api.rename_folder(name, new_name).await,
            Mutation::DeleteFolder { name } => api.delete_folder(name).await,
            Mutation::ImportSnippets(export) => api.import_snippets(export).await.map(|_| ()),
        }
    }
}

/// Outcome of a submitted mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// Accepted by the daemon
    Applied,
    /// Held until the daemon answers again; `position` is 1-based
    Queued { position: usize },
}

/// Foreground view of daemon state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheSnapshot {
    pub history: Vec<ClipItem>,
    pub snippets: Vec<SnippetFolder>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

/// What happened to the offline queue on reconnection
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: usize,
    /// Queued writes the daemon refused; these are dropped
    pub rejected: Vec<(Mutation, GatewayError)>,
    /// Left queued because the daemon is still unreachable
    pub remaining: usize,
}

struct Inner {
    connected: bool,
    queue: VecDeque<Mutation>,
}

/// Keeps the foreground cache consistent with the daemon.
///
/// Writes go through `submit`, which holds the queue lock while applying, so
/// queued writes are always replayed before a newer one reaches the daemon.
pub struct SyncCoordinator {
    api: Arc<dyn DaemonApi>,
    inner: Mutex<Inner>,
    cache: RwLock<CacheSnapshot>,
    max_queued: usize,
    retry: Backoff,
    /// Signalled when a write is queued while connected
    stalled: Notify,
}

impl SyncCoordinator {
    pub fn new(api: Arc<dyn DaemonApi>, max_queued: usize) -> Self {
        Self {
            api,
            inner: Mutex::new(Inner {
                connected: false,
                queue: VecDeque::new(),
            }),
            cache: RwLock::new(CacheSnapshot::default()),
            max_queued,
            retry: Backoff::new(Duration::from_millis(250), Duration::from_secs(10), u32::MAX),
            stalled: Notify::new(),
        }
    }

    /// Delays between replay attempts while connected with writes still queued
    pub fn with_retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        self.cache.read().await.clone()
    }

    pub async fn history(&self) -> Vec<ClipItem> {
        self.cache.read().await.history.clone()
    }

    pub async fn snippet_folders(&self) -> Vec<SnippetFolder> {
        self.cache.read().await.snippets.clone()
    }

    pub async fn pending(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    /// Apply a write now, or queue it while the daemon is unreachable.
    ///
    /// Validation failures are returned as-is and never queued.
    pub async fn submit(&self, mutation: Mutation) -> Result<Submitted, SyncError> {
        let mut inner = self.inner.lock().await;

        if inner.connected {
            if !inner.queue.is_empty() {
                let report = self.replay(&mut inner).await;
                log_replay(&report);
            }
            if inner.queue.is_empty() {
                match mutation.apply(self.api.as_ref()).await {
                    Ok(()) => {
                        self.refresh(mutation.scope()).await;
                        return Ok(Submitted::Applied);
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!("daemon unreachable, queueing write: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if inner.queue.len() >= self.max_queued {
            return Err(SyncError::QueueFull(inner.queue.len()));
        }
        inner.queue.push_back(mutation);
        if inner.connected {
            self.stalled.notify_one();
        }
        Ok(Submitted::Queued {
            position: inner.queue.len(),
        })
    }

    /// React to a connection observation.
    ///
    /// On a transition to Connected the queue is replayed in order and the
    /// cache is replaced with daemon state. While already connected, writes
    /// queued by a failed call are replayed again.
    pub async fn on_connection_change(&self, state: &ConnectionState) -> Option<ReplayReport> {
        let mut inner = self.inner.lock().await;
        let was_connected = inner.connected;
        inner.connected = state.is_connected();
        if !inner.connected || (was_connected && inner.queue.is_empty()) {
            return None;
        }

        let report = self.replay(&mut inner).await;
        if !was_connected || report.applied > 0 || !report.rejected.is_empty() {
            if let Err(e) = self.reconcile().await {
                tracing::warn!("reconciliation failed: {e}");
            }
        }
        Some(report)
    }

    /// Follow the supervisor's connection state until it goes away.
    ///
    /// While connected with writes still queued, replay is retried on the
    /// coordinator's backoff schedule.
    pub async fn follow(&self, mut states: watch::Receiver<ConnectionState>) {
        let mut attempt = 0u32;
        let mut state = states.borrow_and_update().clone();
        loop {
            if let Some(report) = self.on_connection_change(&state).await {
                log_replay(&report);
            }

            let stalled = state.is_connected() && self.pending().await > 0;
            let changed = if stalled {
                let delay = self.retry.delay(attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    changed = states.changed() => changed,
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            } else {
                attempt = 0;
                tokio::select! {
                    changed = states.changed() => changed,
                    _ = self.stalled.notified() => Ok(()),
                }
            };
            if changed.is_err() {
                break;
            }
            state = states.borrow_and_update().clone();
        }
    }

    /// Replace the whole cache with daemon state.
    pub async fn reconcile(&self) -> Result<(), GatewayError> {
        let history = self.api.history().await?;
        let snippets = self.api.snippets().await?;
        let mut cache = self.cache.write().await;
        *cache = CacheSnapshot {
            history,
            snippets,
            reconciled_at: Some(Utc::now()),
        };
        tracing::debug!(
            history = cache.history.len(),
            folders = cache.snippets.len(),
            "cache reconciled"
        );
        Ok(())
    }

    async fn replay(&self, inner: &mut Inner) -> ReplayReport {
        let mut report = ReplayReport::default();
        while let Some(mutation) = inner.queue.front().cloned() {
            match mutation.apply(self.api.as_ref()).await {
                Ok(()) => {
                    inner.queue.pop_front();
                    report.applied += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("replay interrupted: {e}");
                    break;
                }
                Err(e) => {
                    inner.queue.pop_front();
                    tracing::warn!(?mutation, "queued write rejected: {e}");
                    report.rejected.push((mutation, e));
                }
            }
        }
        report.remaining = inner.queue.len();
        report
    }

    async fn refresh(&self, scope: Scope) {
        match scope {
            Scope::History => match self.api.history().await {
                Ok(history) => self.cache.write().await.history = history,
                Err(e) => tracing::warn!("history refresh failed: {e}"),
            },
            Scope::Snippets => match self.api.snippets().await {
                Ok(snippets) => self.cache.write().await.snippets = snippets,
                Err(e) => tracing::warn!("snippet refresh failed: {e}"),
            },
        }
    }
}

fn log_replay(report: &ReplayReport) {
    if report.applied == 0 && report.rejected.is_empty() {
        return;
    }
    tracing::info!(
        applied = report.applied,
        rejected = report.rejected.len(),
        remaining = report.remaining,
        "replayed offline writes"
    );
}
