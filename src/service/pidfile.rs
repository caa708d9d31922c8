// clipkeeper - Daemon Identity Record
// PID file in the supervisor's own state directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// PID filename within the state directory
const PID_NAME: &str = "daemon.pid";

/// Records which process the supervisor last spawned.
#[derive(Clone, Debug)]
pub struct PidRecord {
    path: PathBuf,
}

impl PidRecord {
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(PID_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, pid.to_string())
    }

    /// Recorded PID, if the file exists and holds a positive number
    pub fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0)
    }

    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
