// clipkeeper - Daemon Process Handling
// Locating, spawning, signalling, and reaping the clipkeeperd process

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::SupervisorError;

/// Environment variable carrying the resolved port to the daemon
pub const PORT_ENV: &str = "CLIPKEEPER_PORT";
/// Overrides where the daemon binary is looked up
const DAEMON_BINARY_ENV: &str = "CLIPKEEPER_DAEMON_BINARY";
const DAEMON_NAME: &str = "clipkeeperd";
/// Placeholder in argument templates replaced by the resolved port
const PORT_PLACEHOLDER: &str = "{port}";

/// How to launch the daemon.
#[derive(Clone, Debug)]
pub struct DaemonCommand {
    pub program: PathBuf,
    /// Entry file passed as the first argument, for interpreted daemons
    pub entry: Option<PathBuf>,
    /// Arguments; `{port}` is replaced with the resolved port
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl DaemonCommand {
    /// Launch `program --port {port}`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            entry: None,
            args: vec!["--port".to_string(), PORT_PLACEHOLDER.to_string()],
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Executable name used to recognise a stale instance in the process table
    pub fn process_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DAEMON_NAME.to_string())
    }

    fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }
}

/// Find the clipkeeperd binary.
///
/// Order: explicit setting, `CLIPKEEPER_DAEMON_BINARY`, next to the current
/// executable, then bare name for a PATH lookup.
pub fn find_daemon_binary(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(DAEMON_BINARY_ENV) {
        return PathBuf::from(path);
    }
    if let Ok(exe) = std::env::current_exe() {
        let sibling = exe.with_file_name(format!("{DAEMON_NAME}{}", std::env::consts::EXE_SUFFIX));
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(DAEMON_NAME)
}

/// Resolve a program to an existing file, searching PATH for bare names
pub(crate) fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() || program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Fail fast if the executable or the entry file is missing.
pub(crate) fn check_prerequisites(command: &DaemonCommand) -> Result<PathBuf, SupervisorError> {
    let program = resolve_program(&command.program).ok_or_else(|| {
        SupervisorError::StartupFailure(format!(
            "daemon executable not found: {}",
            command.program.display()
        ))
    })?;
    if let Some(entry) = &command.entry {
        if !entry.is_file() {
            return Err(SupervisorError::StartupFailure(format!(
                "daemon entry file missing: {}",
                entry.display()
            )));
        }
    }
    Ok(program)
}

/// Spawn the daemon with the port injected, draining its output into tracing.
pub(crate) fn spawn(
    command: &DaemonCommand,
    program: &Path,
    port: u16,
) -> Result<Child, SupervisorError> {
    let mut cmd = Command::new(program);
    if let Some(entry) = &command.entry {
        cmd.arg(entry);
    }
    cmd.args(command.args_for_port(port))
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(PORT_ENV, port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        SupervisorError::StartupFailure(format!("failed to spawn {}: {e}", program.display()))
    })?;
    let pid = child.id().unwrap_or_default();
    drain_output(child.stdout.take(), pid, "stdout");
    drain_output(child.stderr.take(), pid, "stderr");
    Ok(child)
}

fn drain_output<R>(stream: Option<R>, pid: u32, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "clipkeeperd", pid, stream = stream_name, "{line}")
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(pid, stream = stream_name, "output drain ended: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Option<nix::sys::signal::Signal>) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), signal).is_ok()
}

#[cfg(not(unix))]
fn with_process<T>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(f)
}

/// Whether a process with this PID exists
pub(crate) fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        send_signal(pid, None)
    }
    #[cfg(not(unix))]
    {
        with_process(pid, |_| ()).is_some()
    }
}

/// Ask a process to exit. Returns false if no signal could be delivered.
pub(crate) fn terminate(pid: u32) -> bool {
    #[cfg(unix)]
    {
        send_signal(pid, Some(nix::sys::signal::Signal::SIGTERM))
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

pub(crate) fn force_kill(pid: u32) -> bool {
    #[cfg(unix)]
    {
        send_signal(pid, Some(nix::sys::signal::Signal::SIGKILL))
    }
    #[cfg(not(unix))]
    {
        with_process(pid, |p| p.kill()).unwrap_or(false)
    }
}

/// Whether the process's executable name contains `expected`
pub(crate) fn process_name_matches(pid: u32, expected: &str) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| p.name().to_string_lossy().contains(expected))
        .unwrap_or(false)
}

/// Sent by a reaper when its child has exited, for whatever reason
#[derive(Debug)]
pub(crate) struct ExitNotice {
    pub generation: u64,
    pub status: Option<ExitStatus>,
    /// The exit followed a stop request
    pub requested: bool,
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Stop(Option<Duration>),
}

/// The supervisor's handle on one spawned daemon.
///
/// The child itself lives in a reaper task that waits for it to exit or for a
/// stop request, whichever comes first.
pub(crate) struct ChildHandle {
    pub pid: u32,
    pub generation: u64,
    stop_tx: oneshot::Sender<Duration>,
    reaper: JoinHandle<Option<ExitStatus>>,
}

impl ChildHandle {
    pub(crate) fn adopt<M>(mut child: Child, generation: u64, notify: mpsc::WeakSender<M>) -> Self
    where
        M: From<ExitNotice> + Send + 'static,
    {
        let pid = child.id().unwrap_or_default();
        let (stop_tx, stop_rx) = oneshot::channel::<Duration>();

        let reaper = tokio::spawn(async move {
            let wake = tokio::select! {
                status = child.wait() => Wake::Exited(status),
                grace = stop_rx => Wake::Stop(grace.ok()),
            };
            let (status, requested) = match wake {
                Wake::Exited(status) => (status.ok(), false),
                Wake::Stop(grace) => {
                    let status = terminate_child(&mut child, pid, grace.unwrap_or_default()).await;
                    (status, true)
                }
            };

            // Delivered from a detached task so the supervisor can await this
            // reaper without waiting on its own mailbox.
            if let Some(tx) = notify.upgrade() {
                let notice = ExitNotice {
                    generation,
                    status,
                    requested,
                };
                tokio::spawn(async move {
                    let _ = tx.send(M::from(notice)).await;
                });
            }
            status
        });

        Self {
            pid,
            generation,
            stop_tx,
            reaper,
        }
    }

    /// Graceful stop, escalating to a kill after `grace`. Returns once reaped.
    pub(crate) async fn terminate(self, grace: Duration) -> Option<ExitStatus> {
        let _ = self.stop_tx.send(grace);
        match self.reaper.await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = self.pid, "reaper task failed: {e}");
                None
            }
        }
    }
}

async fn terminate_child(child: &mut Child, pid: u32, grace: Duration) -> Option<ExitStatus> {
    if terminate(pid) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status.ok(),
            Err(_) => tracing::warn!(pid, ?grace, "daemon ignored SIGTERM, killing"),
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(pid, "failed to kill daemon: {e}");
    }
    child.wait().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn port_placeholder_is_substituted() {
        let command = DaemonCommand::new("clipkeeperd").with_args(["--port", "{port}", "--bind={port}"]);
        assert_eq!(
            command.args_for_port(5000),
            vec!["--port", "5000", "--bind=5000"]
        );
    }

    #[test]
    fn process_name_is_the_file_stem() {
        assert_eq!(DaemonCommand::new("/opt/bin/clipkeeperd").process_name(), "clipkeeperd");
    }

    #[test]
    fn missing_executable_is_a_startup_failure() {
        let command = DaemonCommand::new("/definitely/not/here/clipkeeperd");
        let err = check_prerequisites(&command).unwrap_err();
        assert!(matches!(err, SupervisorError::StartupFailure(msg) if msg.contains("not found")));
    }

    #[test]
    fn unknown_bare_name_is_a_startup_failure() {
        let command = DaemonCommand::new("clipkeeperd-does-not-exist-anywhere");
        assert!(check_prerequisites(&command).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn missing_entry_file_is_a_startup_failure() {
        let dir = tempdir().unwrap();
        let command = DaemonCommand::new("sh").with_entry(dir.path().join("daemon.py"));
        let err = check_prerequisites(&command).unwrap_err();
        assert!(matches!(err, SupervisorError::StartupFailure(msg) if msg.contains("entry file")));
    }

    #[test]
    fn configured_binary_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom-daemon");
        assert_eq!(find_daemon_binary(Some(&path)), path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_a_cooperative_child() {
        let (tx, mut rx) = mpsc::channel::<ExitNotice>(4);
        let program = resolve_program(Path::new("sleep")).unwrap();
        let child = spawn(&DaemonCommand::new("sleep").with_args(["30"]), &program, 1).unwrap();
        let handle = ChildHandle::adopt(child, 7, tx.downgrade());
        let pid = handle.pid;
        assert!(is_alive(pid));

        let status = handle.terminate(Duration::from_secs(2)).await;
        assert!(status.is_some());

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.generation, 7);
        assert!(notice.requested);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_escalates_to_kill() {
        let (tx, _rx) = mpsc::channel::<ExitNotice>(4);
        let program = resolve_program(Path::new("sh")).unwrap();
        let command = DaemonCommand::new("sh").with_args(["-c", "trap '' TERM; sleep 30"]);
        let child = spawn(&command, &program, 1).unwrap();
        let handle = ChildHandle::adopt(child, 1, tx.downgrade());
        // give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = handle.terminate(Duration::from_millis(300)).await;
        assert!(status.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unexpected_exit_is_reported() {
        let (tx, mut rx) = mpsc::channel::<ExitNotice>(4);
        let program = resolve_program(Path::new("sh")).unwrap();
        let command = DaemonCommand::new("sh").with_args(["-c", "exit 3"]);
        let child = spawn(&command, &program, 1).unwrap();
        let _handle = ChildHandle::adopt(child, 2, tx.downgrade());

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.generation, 2);
        assert!(!notice.requested);
        assert_eq!(notice.status.and_then(|s| s.code()), Some(3));
    }
}
