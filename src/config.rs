// clipkeeper - Configuration Management
// Settings file, directories, and environment overrides

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::service::{find_daemon_binary, DaemonCommand, HealthPolicy, SupervisorConfig};
use crate::store::HistoryLimits;
use crate::sync::DEFAULT_MAX_QUEUED;

/// Port the daemon listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 49917;

/// Environment variable names
pub mod env {
    pub const PORT: &str = "CLIPKEEPER_PORT";
    pub const DATA_DIR: &str = "CLIPKEEPER_DATA_DIR";
    pub const DAEMON_BINARY: &str = "CLIPKEEPER_DAEMON_BINARY";
}

/// Application settings, stored as JSON in the config directory
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub auto_start_service: bool,
    pub service_port: u16,
    pub max_history_size: usize,
    pub display_count: usize,
    pub items_per_folder: usize,
    pub max_queued_ops: usize,
    /// Daemon binary; found next to this executable when unset
    pub daemon_binary: Option<PathBuf>,
    /// Daemon data directory; the platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub health_interval_ms: u64,
    pub startup_backoff_base_ms: u64,
    pub startup_backoff_cap_ms: u64,
    pub startup_attempts: u32,
    pub max_restarts: u32,
    pub shutdown_grace_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::default_settings()
    }
}

impl AppSettings {
    pub fn default_settings() -> Self {
        let startup = Backoff::default();
        Self {
            auto_start_service: true,
            service_port: DEFAULT_PORT,
            max_history_size: 100,
            display_count: 10,
            items_per_folder: 10,
            max_queued_ops: DEFAULT_MAX_QUEUED,
            daemon_binary: None,
            data_dir: None,
            health_interval_ms: 5_000,
            startup_backoff_base_ms: startup.base.as_millis() as u64,
            startup_backoff_cap_ms: startup.cap.as_millis() as u64,
            startup_attempts: startup.max_attempts,
            max_restarts: 3,
            shutdown_grace_ms: 2_000,
        }
    }

    /// Apply `CLIPKEEPER_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(env::PORT) {
            match port.trim().parse() {
                Ok(port) => self.service_port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid {}", env::PORT),
            }
        }
        if let Some(dir) = lookup(env::DATA_DIR).filter(|d| !d.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(binary) = lookup(env::DAEMON_BINARY).filter(|b| !b.is_empty()) {
            self.daemon_binary = Some(PathBuf::from(binary));
        }
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_items: self.max_history_size,
            display_count: self.display_count,
            items_per_folder: self.items_per_folder,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            startup: Backoff::new(
                Duration::from_millis(self.startup_backoff_base_ms),
                Duration::from_millis(self.startup_backoff_cap_ms),
                self.startup_attempts,
            ),
            poll_interval: Duration::from_millis(self.health_interval_ms.max(100)),
            ..HealthPolicy::default()
        }
    }

    /// Command line for the daemon, carrying the store limits and data dir
    pub fn daemon_command(&self) -> anyhow::Result<DaemonCommand> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => paths::data_dir()?,
        };
        let limits = self.history_limits();
        Ok(DaemonCommand::new(find_daemon_binary(self.daemon_binary.as_deref())).with_args([
            "--port".to_string(),
            "{port}".to_string(),
            "--data-dir".to_string(),
            data_dir.to_string_lossy().into_owned(),
            "--max-history".to_string(),
            limits.max_items.to_string(),
            "--display-count".to_string(),
            limits.display_count.to_string(),
            "--items-per-folder".to_string(),
            limits.items_per_folder.to_string(),
        ]))
    }

    pub fn supervisor_config(&self) -> anyhow::Result<SupervisorConfig> {
        let mut config =
            SupervisorConfig::new(self.service_port, self.daemon_command()?, paths::state_dir()?);
        config.health = self.health_policy();
        config.max_restarts = self.max_restarts;
        config.grace_period = Duration::from_millis(self.shutdown_grace_ms);
        Ok(config)
    }
}

/// Per-user directories, all under a `clipkeeper` subdirectory
pub mod paths {
    use std::path::PathBuf;

    const APP_DIR: &str = "clipkeeper";

    fn app_dir(base: Option<PathBuf>, kind: &str) -> anyhow::Result<PathBuf> {
        let base = base.ok_or_else(|| anyhow::anyhow!("Failed to locate the {} directory", kind))?;
        let dir = base.join(APP_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        app_dir(dirs::config_dir(), "config")
    }

    /// Where the daemon keeps history.json and snippets.json
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        app_dir(dirs::data_dir(), "data")
    }

    /// Supervisor-owned state such as the daemon PID record
    pub fn state_dir() -> anyhow::Result<PathBuf> {
        app_dir(dirs::state_dir().or_else(dirs::data_local_dir), "state")
    }
}

/// Settings file operations
pub mod settings {
    use super::*;
    use std::path::Path;

    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(paths::config_dir()?.join("settings.json"))
    }

    /// Load settings from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> anyhow::Result<AppSettings> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let settings: AppSettings = serde_json::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(AppSettings::default_settings())
        }
    }

    /// Save settings to file
    pub fn save(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
