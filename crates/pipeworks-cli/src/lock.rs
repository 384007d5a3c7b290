//! Daemon PID/status file, written atomically (write-then-rename) the way
//! the core library's teacher tracks its publish lock.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PID_FILE: &str = "pipeworks.pid";

/// Metadata stored in the PID file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidInfo {
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

/// PID file handle; releases the file on `release` or on `Drop`.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the daemon's PID file. Fails if one already exists — a second
    /// `daemon start` while one is running is a user error, not something to
    /// silently steal.
    pub fn acquire(run_dir: &Path) -> Result<Self> {
        fs::create_dir_all(run_dir)
            .with_context(|| format!("failed to create run dir {}", run_dir.display()))?;

        let path = run_dir.join(PID_FILE);
        if path.exists() {
            let existing = read_pid_info(&path)?;
            bail!(
                "daemon already running: pid {} on {} since {}",
                existing.pid,
                existing.hostname,
                existing.started_at
            );
        }

        let info = PidInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            started_at: Utc::now(),
        };

        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&info).context("serializing PID info")?;
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("writing {}", tmp_path.display()))?;
            file.sync_all().context("syncing PID file")?;
        }
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;

        Ok(Self { path })
    }

    pub fn pid(&self) -> u32 {
        std::process::id()
    }

    pub fn release(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn read(run_dir: &Path) -> Result<PidInfo> {
        read_pid_info(&run_dir.join(PID_FILE))
    }
}

fn read_pid_info(path: &Path) -> Result<PidInfo> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
