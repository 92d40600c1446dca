//! Cluster enabled/running status and the daemon pid file.

use std::path::{Path, PathBuf};

use fleet_common::constants::DAEMON_NAME;
use fleet_common::{ClusterError, ClusterStatus};

/// `enabled` from configuration, `running` from pid files in `run_dir`
pub fn cluster_status(enabled: bool, run_dir: &Path) -> ClusterStatus {
    ClusterStatus {
        enabled: enabled.into(),
        running: daemon_running(run_dir).into(),
    }
}

fn daemon_running(run_dir: &Path) -> bool {
    let prefix = format!("{DAEMON_NAME}-");
    let Ok(entries) = std::fs::read_dir(run_dir) else {
        return false;
    };

    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with(&prefix) && name.ends_with(".pid")
    })
}

/// `<run_dir>/clusterd-<pid>.pid`, removed on drop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(run_dir: &Path) -> Result<Self, ClusterError> {
        let pid = std::process::id();
        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join(format!("{DAEMON_NAME}-{pid}.pid"));
        std::fs::write(&path, format!("{pid}\n"))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}
