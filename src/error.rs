// clipkeeper - Error Types
// Store, gateway, and supervisor failure taxonomy

use thiserror::Error;

/// Failures from the history and snippet stores.
///
/// All of these are validation errors from the caller's point of view: they are
/// never retried and are returned as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0}")]
    Invalid(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("folder already exists: {0}")]
    FolderExists(String),
}

impl StoreError {
    pub(crate) fn folder_not_found(name: &str) -> Self {
        StoreError::NotFound {
            kind: "folder",
            id: name.to_string(),
        }
    }

    pub(crate) fn snippet_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "snippet",
            id: id.to_string(),
        }
    }

    pub(crate) fn clip_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "clip",
            id: id.to_string(),
        }
    }
}

/// Classified outcome of a failed call to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 4xx: the request itself was rejected
    #[error("rejected by daemon ({status}): {detail}")]
    Validation { status: u16, detail: String },

    /// 5xx: the daemon failed while handling the request
    #[error("daemon error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// Connection refused, reset, or timed out
    #[error("network error: {0}")]
    Network(String),

    /// A 2xx response whose body could not be decoded
    #[error("unexpected response from daemon: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Only transport failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Validation { status, .. } | GatewayError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Daemon lifecycle failures surfaced by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// Missing executable or entry point, or the daemon never became healthy
    #[error("daemon failed to start: {0}")]
    StartupFailure(String),

    /// The port is held by something that is not our stale daemon
    #[error("port {port} is unavailable: {detail}")]
    PortConflict { port: u16, detail: String },

    /// Exited or went unresponsive and the restart budget is spent
    #[error("daemon crashed and {restarts} restart attempts failed: {reason}")]
    ProcessCrashed { restarts: u32, reason: String },

    #[error("daemon health check timed out: {0}")]
    HealthCheckTimeout(String),

    #[error("supervisor has shut down")]
    Closed,
}

impl SupervisorError {
    /// Fatal errors need operator action and are never retried automatically
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::StartupFailure(_) | SupervisorError::PortConflict { .. }
        )
    }
}

/// Failures of foreground writes routed through the sync coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The daemon is unreachable and the offline queue has no room
    #[error("offline queue is full ({0} pending operations)")]
    QueueFull(usize),
}
