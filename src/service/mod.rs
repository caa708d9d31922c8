// clipkeeper - Daemon Service Management
// Spawning, health checking, and lifecycle of the clipkeeperd process

mod health;
mod pidfile;
mod port;
mod process;
mod supervisor;

pub use health::{HealthEvent, HealthMonitor, HealthPolicy, HealthProbe, HealthReport, HealthTracker};
pub use pidfile::PidRecord;
pub use port::{PortDecision, PortResolver};
pub use process::{find_daemon_binary, DaemonCommand, PORT_ENV};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorStatus};

use serde::Serialize;

/// Lifecycle of the daemon process as seen by the supervisor
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DaemonProcessState {
    Stopped,
    Starting,
    Running,
    /// Alive, but health checks are failing
    Degraded,
    /// Exited unexpectedly or stopped answering past the crash threshold
    Crashed,
}

/// Connection status exposed to the UI boundary
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl From<DaemonProcessState> for ConnectionState {
    fn from(state: DaemonProcessState) -> Self {
        match state {
            DaemonProcessState::Stopped => ConnectionState::Disconnected,
            DaemonProcessState::Running => ConnectionState::Connected,
            DaemonProcessState::Starting
            | DaemonProcessState::Degraded
            | DaemonProcessState::Crashed => ConnectionState::Connecting,
        }
    }
}
