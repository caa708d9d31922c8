// clipkeeper - Health Monitoring
// Startup readiness polling and steady-state liveness checks for the daemon

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::DaemonProcessState;
use crate::api::HealthResponse;
use crate::backoff::Backoff;
use crate::error::GatewayError;

/// Something that can ask a daemon on `port` whether it is healthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, port: u16) -> Result<HealthResponse, GatewayError>;
}

/// Timing and thresholds for health checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Readiness polling right after spawn
    pub startup: Backoff,
    /// Interval between liveness checks once running
    pub poll_interval: Duration,
    /// Consecutive failures before Running becomes Degraded
    pub degraded_after: u32,
    /// Consecutive failures before the daemon is treated as crashed
    pub crashed_after: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            startup: Backoff::default(),
            poll_interval: Duration::from_secs(5),
            degraded_after: 3,
            crashed_after: 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HealthReport {
    Healthy(HealthResponse),
    Unhealthy(String),
    /// Readiness polling ran out of attempts
    StartupTimedOut { attempts: u32, last_error: String },
}

/// A report tagged with the spawn generation it belongs to
#[derive(Clone, Debug, PartialEq)]
pub struct HealthEvent {
    pub generation: u64,
    pub report: HealthReport,
}

/// Folds health results into process state transitions.
#[derive(Clone, Debug)]
pub struct HealthTracker {
    policy: HealthPolicy,
    failures: u32,
}

impl HealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Consecutive failed checks so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Next state after one check, given the current one.
    pub fn observe(&mut self, current: DaemonProcessState, healthy: bool) -> DaemonProcessState {
        use DaemonProcessState::*;

        if healthy {
            self.failures = 0;
            return match current {
                Starting | Running | Degraded => Running,
                other => other,
            };
        }

        self.failures = self.failures.saturating_add(1);
        match current {
            Running | Degraded if self.failures >= self.policy.crashed_after => Crashed,
            Running | Degraded if self.failures >= self.policy.degraded_after => Degraded,
            other => other,
        }
    }
}

/// Background task polling one daemon instance.
///
/// Dropping the supervisor side of the channel ends the task; `stop` ends it
/// deterministically.
pub struct HealthMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start polling `port`. `pid` is the spawned child; a response from any
    /// other process counts as a failure.
    pub fn spawn<M>(
        probe: Arc<dyn HealthProbe>,
        port: u16,
        pid: Option<u32>,
        policy: HealthPolicy,
        generation: u64,
        notify: mpsc::WeakSender<M>,
    ) -> Self
    where
        M: From<HealthEvent> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            probe,
            port,
            pid,
            policy,
            generation,
            notify,
            cancel.clone(),
        ));
        Self { cancel, task }
    }

    /// Cancel polling and wait for the task to exit. No event is delivered
    /// after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("health monitor task failed: {e}");
        }
    }
}

async fn check(probe: &dyn HealthProbe, port: u16, pid: Option<u32>) -> Result<HealthResponse, String> {
    let health = probe.probe(port).await.map_err(|e| e.to_string())?;
    if !health.is_healthy() {
        return Err(format!("daemon reported status {:?}", health.status));
    }
    match pid {
        Some(expected) if health.pid != 0 && health.pid != expected => Err(format!(
            "port {port} answered by pid {} instead of {expected}",
            health.pid
        )),
        _ => Ok(health),
    }
}

async fn deliver<M>(
    notify: &mpsc::WeakSender<M>,
    cancel: &CancellationToken,
    event: HealthEvent,
) -> bool
where
    M: From<HealthEvent> + Send + 'static,
{
    let Some(tx) = notify.upgrade() else {
        return false;
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(M::from(event)) => sent.is_ok(),
    }
}

async fn monitor_loop<M>(
    probe: Arc<dyn HealthProbe>,
    port: u16,
    pid: Option<u32>,
    policy: HealthPolicy,
    generation: u64,
    notify: mpsc::WeakSender<M>,
    cancel: CancellationToken,
) where
    M: From<HealthEvent> + Send + 'static,
{
    let event = |report| HealthEvent { generation, report };

    // Readiness
    let mut attempt = 0;
    let mut last_error = String::from("no health check attempted");
    loop {
        if attempt >= policy.startup.max_attempts {
            tracing::warn!(port, attempts = attempt, "daemon never became healthy: {last_error}");
            let report = HealthReport::StartupTimedOut {
                attempts: attempt,
                last_error,
            };
            deliver(&notify, &cancel, event(report)).await;
            return;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = check(probe.as_ref(), port, pid) => result,
        };
        match result {
            Ok(health) => {
                tracing::debug!(port, attempt, "daemon is ready");
                if !deliver(&notify, &cancel, event(HealthReport::Healthy(health))).await {
                    return;
                }
                break;
            }
            Err(e) => last_error = e,
        }

        let delay = policy.startup.delay(attempt);
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // Liveness
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(policy.poll_interval) => {}
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = check(probe.as_ref(), port, pid) => result,
        };
        let report = match result {
            Ok(health) => HealthReport::Healthy(health),
            Err(e) => {
                tracing::debug!(port, "health check failed: {e}");
                HealthReport::Unhealthy(e)
            }
        };
        if !deliver(&notify, &cancel, event(report)).await {
            return;
        }
    }
}
