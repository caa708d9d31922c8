// clipkeeper - Port Resolution
// Decide whether an occupied daemon port can be reclaimed or is a conflict

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::health::HealthProbe;
use super::process;
use crate::error::SupervisorError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const RELEASE_POLL: Duration = Duration::from_millis(50);

/// What to do about the configured port before spawning
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortDecision {
    Available,
    /// Held by a stale daemon this supervisor spawned earlier
    Reclaim { pid: u32 },
    /// Held by something else
    Conflict { detail: String },
}

pub struct PortResolver {
    probe: Arc<dyn HealthProbe>,
    daemon_name: String,
    release_timeout: Duration,
}

impl PortResolver {
    pub fn new(probe: Arc<dyn HealthProbe>, daemon_name: impl Into<String>) -> Self {
        Self {
            probe,
            daemon_name: daemon_name.into(),
            release_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Whether something is already bound to the port on loopback
    pub fn is_port_in_use(port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err()
    }

    /// Classify the port. `recorded` is the PID from our identity record.
    pub async fn resolve(&self, port: u16, recorded: Option<u32>) -> PortDecision {
        if !Self::is_port_in_use(port) {
            return PortDecision::Available;
        }

        match tokio::time::timeout(PROBE_TIMEOUT, self.probe.probe(port)).await {
            Ok(Ok(health)) if health.is_ours() => match recorded {
                Some(pid) if health.pid == pid => PortDecision::Reclaim { pid },
                _ => PortDecision::Conflict {
                    detail: format!(
                        "held by a {} instance (pid {}) this supervisor did not start",
                        health.service, health.pid
                    ),
                },
            },
            Ok(Ok(health)) => PortDecision::Conflict {
                detail: format!("held by another service ({:?})", health.service),
            },
            // Not answering HTTP; only reclaim if our recorded process is still there.
            _ => match recorded {
                Some(pid)
                    if process::is_alive(pid)
                        && process::process_name_matches(pid, &self.daemon_name) =>
                {
                    PortDecision::Reclaim { pid }
                }
                _ => PortDecision::Conflict {
                    detail: "held by a process that is not a clipkeeper daemon".to_string(),
                },
            },
        }
    }

    /// Terminate a stale daemon and wait for the port to be released.
    ///
    /// Waits on the port rather than the PID: an unreaped process keeps its
    /// PID after it has closed its sockets.
    pub async fn reclaim(&self, port: u16, pid: u32, grace: Duration) -> Result<(), SupervisorError> {
        tracing::info!(port, pid, "reclaiming port from stale daemon");
        process::terminate(pid);
        if wait_for_release(port, grace).await {
            return Ok(());
        }

        tracing::warn!(port, pid, "stale daemon ignored SIGTERM, killing");
        process::force_kill(pid);
        if wait_for_release(port, self.release_timeout).await {
            return Ok(());
        }

        Err(SupervisorError::PortConflict {
            port,
            detail: format!("stale daemon (pid {pid}) did not release the port"),
        })
    }

    /// Resolve and, when needed, reclaim. Fails with `PortConflict` for
    /// anything that is not our stale daemon.
    pub async fn ensure_available(
        &self,
        port: u16,
        recorded: Option<u32>,
        grace: Duration,
    ) -> Result<(), SupervisorError> {
        match self.resolve(port, recorded).await {
            PortDecision::Available => Ok(()),
            PortDecision::Reclaim { pid } => self.reclaim(port, pid, grace).await,
            PortDecision::Conflict { detail } => Err(SupervisorError::PortConflict { port, detail }),
        }
    }
}

async fn wait_for_release(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !PortResolver::is_port_in_use(port) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(RELEASE_POLL).await;
    }
}
