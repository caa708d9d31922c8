// clipkeeper - Daemon Supervisor
// Serialized lifecycle control for the clipkeeperd process

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::health::{HealthEvent, HealthMonitor, HealthPolicy, HealthProbe, HealthReport, HealthTracker};
use super::pidfile::PidRecord;
use super::port::PortResolver;
use super::process::{self, ChildHandle, DaemonCommand, ExitNotice};
use super::{ConnectionState, DaemonProcessState};
use crate::backoff::Backoff;
use crate::error::SupervisorError;

/// Mailbox depth for the control task
const MAILBOX: usize = 32;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub port: u16,
    pub command: DaemonCommand,
    /// Where the PID record lives
    pub state_dir: PathBuf,
    /// How long a stopping daemon gets before it is killed
    pub grace_period: Duration,
    /// Automatic restarts allowed before giving up
    pub max_restarts: u32,
    pub health: HealthPolicy,
    pub restart_backoff: Backoff,
    /// Healthy time after which the restart budget is refilled
    pub stable_period: Duration,
    pub port_release_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(port: u16, command: DaemonCommand, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            port,
            command,
            state_dir: state_dir.into(),
            grace_period: Duration::from_secs(2),
            max_restarts: 3,
            health: HealthPolicy::default(),
            restart_backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(5), 3),
            stable_period: Duration::from_secs(30),
            port_release_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of the supervisor for display and tests
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SupervisorStatus {
    pub state: DaemonProcessState,
    pub connection: ConnectionState,
    pub pid: Option<u32>,
    pub port: u16,
    /// Automatic restarts since the last explicit start or stable period
    pub restarts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Restart,
}

enum Msg {
    Command(Command, oneshot::Sender<Result<(), SupervisorError>>),
    Status(oneshot::Sender<SupervisorStatus>),
    Exited(ExitNotice),
    Health(HealthEvent),
    /// Backoff timer for a crash restart fired
    Retry(u64),
}

impl From<ExitNotice> for Msg {
    fn from(notice: ExitNotice) -> Self {
        Msg::Exited(notice)
    }
}

impl From<HealthEvent> for Msg {
    fn from(event: HealthEvent) -> Self {
        Msg::Health(event)
    }
}

/// Handle to the supervisor task.
///
/// Every lifecycle change, including child exits and health results, goes
/// through one task, so concurrent `start`/`stop`/`restart` calls are applied
/// one at a time. Dropping the last handle stops the daemon.
#[derive(Clone)]
pub struct Supervisor {
    tx: mpsc::Sender<Msg>,
    process: watch::Receiver<DaemonProcessState>,
    connection: watch::Receiver<ConnectionState>,
    failure: watch::Receiver<Option<SupervisorError>>,
}

impl Supervisor {
    /// Spawn the control task. The daemon is not started until `start`.
    pub fn spawn(config: SupervisorConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX);
        let (process_tx, process) = watch::channel(DaemonProcessState::Stopped);
        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);
        let (failure_tx, failure) = watch::channel(None);

        let ports = PortResolver::new(probe.clone(), config.command.process_name())
            .with_release_timeout(config.port_release_timeout);
        let actor = Actor {
            record: PidRecord::in_dir(&config.state_dir),
            tracker: HealthTracker::new(config.health),
            config,
            probe,
            ports,
            tx: tx.downgrade(),
            generation: 0,
            current: None,
            restarts: 0,
            running_since: None,
            retry: None,
            retry_epoch: 0,
            process_tx,
            connection_tx,
            failure_tx,
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            process,
            connection,
            failure,
        }
    }

    async fn request(&self, command: Command) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Command(command, reply))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }

    /// Spawn the daemon. Returns once it is spawned, not once it is healthy.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.request(Command::Start).await
    }

    /// Terminate the daemon, gracefully then forcibly. No health check or
    /// restart timer runs after this returns.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request(Command::Stop).await
    }

    pub async fn restart(&self) -> Result<(), SupervisorError> {
        self.request(Command::Restart).await
    }

    pub async fn status(&self) -> Result<SupervisorStatus, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Status(reply))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    pub fn process_state(&self) -> DaemonProcessState {
        *self.process.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    /// The error behind the current `ConnectionState::Error`, if any
    pub fn last_error(&self) -> Option<SupervisorError> {
        self.failure.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn subscribe_process(&self) -> watch::Receiver<DaemonProcessState> {
        self.process.clone()
    }

    /// Wait until the daemon is connected or the supervisor gives up.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let mut rx = self.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Error(_)))
                .await
                .map(|state| state.is_connected())
        })
        .await;

        let connected = match settled {
            Ok(Ok(connected)) => connected,
            Ok(Err(_)) => return Err(SupervisorError::Closed),
            Err(_) => {
                return Err(SupervisorError::HealthCheckTimeout(format!(
                    "not connected after {timeout:?}"
                )))
            }
        };
        if connected {
            return Ok(());
        }
        Err(self
            .last_error()
            .unwrap_or_else(|| SupervisorError::StartupFailure(self.connection_state_reason())))
    }

    fn connection_state_reason(&self) -> String {
        match &*self.connection.borrow() {
            ConnectionState::Error(reason) => reason.clone(),
            other => format!("{other:?}"),
        }
    }
}

struct Instance {
    child: ChildHandle,
    monitor: HealthMonitor,
}

struct Actor {
    config: SupervisorConfig,
    probe: Arc<dyn HealthProbe>,
    ports: PortResolver,
    record: PidRecord,
    tx: mpsc::WeakSender<Msg>,
    /// Bumped on every spawn; exit and health messages carry the value
    /// current when their instance was spawned
    generation: u64,
    current: Option<Instance>,
    tracker: HealthTracker,
    restarts: u32,
    running_since: Option<Instant>,
    retry: Option<CancellationToken>,
    retry_epoch: u64,
    process_tx: watch::Sender<DaemonProcessState>,
    connection_tx: watch::Sender<ConnectionState>,
    failure_tx: watch::Sender<Option<SupervisorError>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Command(command, reply) => {
                    tracing::debug!(?command, "supervisor command");
                    let result = self.handle(command).await;
                    let _ = reply.send(result);
                }
                Msg::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Msg::Exited(notice) => self.on_exit(notice).await,
                Msg::Health(event) => self.on_health(event).await,
                Msg::Retry(epoch) => self.on_retry(epoch).await,
            }
        }

        // Every handle is gone
        if self.current.is_some() {
            tracing::info!("supervisor dropped, stopping daemon");
        }
        self.teardown().await;
        self.set_state(DaemonProcessState::Stopped);
    }

    async fn handle(&mut self, command: Command) -> Result<(), SupervisorError> {
        match command {
            Command::Start => {
                if self.current.is_some() && self.state() != DaemonProcessState::Crashed {
                    return Ok(());
                }
                self.teardown().await;
                self.restarts = 0;
                self.launch_or_fail().await
            }
            Command::Stop => {
                self.teardown().await;
                self.failure_tx.send_replace(None);
                self.set_state(DaemonProcessState::Stopped);
                Ok(())
            }
            Command::Restart => {
                tracing::info!("restarting daemon");
                self.teardown().await;
                self.restarts = 0;
                self.launch_or_fail().await
            }
        }
    }

    fn state(&self) -> DaemonProcessState {
        *self.process_tx.borrow()
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state(),
            connection: self.connection_tx.borrow().clone(),
            pid: self.current.as_ref().map(|i| i.child.pid),
            port: self.config.port,
            restarts: self.restarts,
            last_error: self.failure_tx.borrow().as_ref().map(ToString::to_string),
        }
    }

    fn set_state(&self, next: DaemonProcessState) {
        let changed = self.process_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::info!(from = ?*state, to = ?next, "daemon state changed");
            *state = next;
            true
        });
        if changed {
            let connection = ConnectionState::from(next);
            self.connection_tx.send_if_modified(|current| {
                if *current == connection {
                    return false;
                }
                *current = connection;
                true
            });
        }
    }

    async fn launch_or_fail(&mut self) -> Result<(), SupervisorError> {
        match self.launch().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Check prerequisites, clear the port, spawn, and begin health checks.
    async fn launch(&mut self) -> Result<(), SupervisorError> {
        let program = process::check_prerequisites(&self.config.command)?;
        let port = self.config.port;
        self.ports
            .ensure_available(port, self.record.read(), self.config.grace_period)
            .await?;

        let child = process::spawn(&self.config.command, &program, port)?;
        self.generation += 1;
        let child = ChildHandle::adopt(child, self.generation, self.tx.clone());
        if let Err(e) = self.record.write(child.pid) {
            tracing::warn!(path = %self.record.path().display(), "failed to write pid record: {e}");
        }
        tracing::info!(pid = child.pid, port, generation = self.generation, "daemon spawned");

        let monitor = HealthMonitor::spawn(
            self.probe.clone(),
            port,
            Some(child.pid),
            self.config.health,
            self.generation,
            self.tx.clone(),
        );
        self.tracker.reset();
        self.running_since = None;
        self.current = Some(Instance { child, monitor });
        self.failure_tx.send_replace(None);
        self.set_state(DaemonProcessState::Starting);
        Ok(())
    }

    /// Stop the current instance, if any, and everything scheduled for it.
    async fn teardown(&mut self) {
        self.cancel_retry();
        if let Some(Instance { child, monitor }) = self.current.take() {
            monitor.stop().await;
            let pid = child.pid;
            let status = child.terminate(self.config.grace_period).await;
            tracing::info!(pid, status = %describe(status), "daemon stopped");
        }
        if let Err(e) = self.record.clear() {
            tracing::warn!(path = %self.record.path().display(), "failed to remove pid record: {e}");
        }
        self.running_since = None;
    }

    /// Terminal failure: nothing runs, the reason is surfaced as an error.
    async fn fail(&mut self, error: SupervisorError) {
        self.teardown().await;
        tracing::error!("daemon supervision failed: {error}");
        self.process_tx.send_if_modified(|state| {
            let changed = *state != DaemonProcessState::Stopped;
            *state = DaemonProcessState::Stopped;
            changed
        });
        self.connection_tx
            .send_replace(ConnectionState::Error(error.to_string()));
        self.failure_tx.send_replace(Some(error));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|i| i.child.generation == generation)
    }

    async fn on_exit(&mut self, notice: ExitNotice) {
        if !self.is_current(notice.generation) {
            tracing::debug!(
                generation = notice.generation,
                requested = notice.requested,
                "ignoring exit of superseded daemon"
            );
            return;
        }

        if let Some(Instance { child, monitor }) = self.current.take() {
            monitor.stop().await;
            tracing::warn!(pid = child.pid, status = %describe(notice.status), "daemon exited unexpectedly");
        }
        self.on_crash(format!("daemon exited ({})", describe(notice.status)))
            .await;
    }

    async fn on_health(&mut self, event: HealthEvent) {
        if !self.is_current(event.generation) {
            return;
        }

        let healthy = match event.report {
            HealthReport::StartupTimedOut {
                attempts,
                last_error,
            } => {
                let error = SupervisorError::StartupFailure(format!(
                    "not healthy after {attempts} checks: {last_error}"
                ));
                self.fail(error).await;
                return;
            }
            HealthReport::Healthy(_) => true,
            HealthReport::Unhealthy(_) => false,
        };

        let previous = self.state();
        let next = self.tracker.observe(previous, healthy);
        match next {
            DaemonProcessState::Crashed => {
                let failures = self.tracker.failures();
                self.teardown().await;
                self.on_crash(format!("unresponsive after {failures} failed health checks"))
                    .await;
            }
            DaemonProcessState::Running => {
                let since = *self.running_since.get_or_insert_with(Instant::now);
                if self.restarts > 0 && since.elapsed() >= self.config.stable_period {
                    tracing::info!(restarts = self.restarts, "daemon stable, restart budget refilled");
                    self.restarts = 0;
                }
                self.set_state(next);
            }
            _ => {
                if next == DaemonProcessState::Degraded && previous != next {
                    tracing::warn!(failures = self.tracker.failures(), "daemon health degraded");
                }
                self.running_since = None;
                self.set_state(next);
            }
        }
    }

    /// The current instance is gone; restart within budget or give up.
    async fn on_crash(&mut self, reason: String) {
        self.running_since = None;
        if self.restarts >= self.config.max_restarts {
            let error = SupervisorError::ProcessCrashed {
                restarts: self.restarts,
                reason,
            };
            self.fail(error).await;
            return;
        }

        let delay = self.config.restart_backoff.delay(self.restarts);
        self.restarts += 1;
        tracing::warn!(
            attempt = self.restarts,
            max = self.config.max_restarts,
            ?delay,
            "{reason}, scheduling restart"
        );
        self.set_state(DaemonProcessState::Crashed);
        self.schedule_retry(delay);
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        self.retry_epoch += 1;
        let epoch = self.retry_epoch;
        let cancel = CancellationToken::new();
        self.retry = Some(cancel.clone());

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Msg::Retry(epoch)).await;
                    }
                }
            }
        });
    }

    fn cancel_retry(&mut self) {
        if let Some(cancel) = self.retry.take() {
            cancel.cancel();
        }
    }

    async fn on_retry(&mut self, epoch: u64) {
        // A stop or explicit start since scheduling makes this timer stale
        if self.retry.is_none() || epoch != self.retry_epoch {
            return;
        }
        self.retry = None;

        match self.launch().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => self.fail(e).await,
            Err(e) => self.on_crash(e.to_string()).await,
        }
    }
}

fn describe(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown status".to_string(),
    }
}
