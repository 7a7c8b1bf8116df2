//! Append-only per-run log files with an atomically updated "latest"
//! pointer.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination for child output lines and lifecycle markers. Injected
/// into the monitor and supervisor so core logic stays decoupled from
/// console/file formatting.
pub trait OutputSink {
    fn write_line(&mut self, line: &str);
}

/// One run's log file: `backfill_<provider>_<timestamp>.log` under the
/// log directory, plus a `backfill_<provider>_latest.log` symlink.
#[derive(Debug)]
pub struct RunLog {
    file: File,
    path: PathBuf,
    echo: bool,
}

impl RunLog {
    /// Create the log directory and this run's file, and repoint the
    /// "latest" symlink. With `echo` set, every line is also printed to
    /// stdout as received.
    pub fn create(dir: &Path, provider: &str, echo: bool) -> std::io::Result<RunLog> {
        fs::create_dir_all(dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("backfill_{provider}_{stamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let log = RunLog { file, path, echo };
        log.point_latest(dir, provider)?;
        Ok(log)
    }

    /// Repoint the "latest" symlink at this run's file. The link is
    /// created under a staging name and renamed over the old one, so a
    /// reader following it never observes a missing pointer.
    fn point_latest(&self, dir: &Path, provider: &str) -> std::io::Result<()> {
        let latest = dir.join(format!("backfill_{provider}_latest.log"));
        let staging = dir.join(format!(".backfill_{provider}_latest.log.tmp"));
        let _ = fs::remove_file(&staging);
        std::os::unix::fs::symlink(&self.path, &staging)?;
        fs::rename(&staging, &latest)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for RunLog {
    fn write_line(&mut self, line: &str) {
        if self.echo {
            println!("{line}");
        }
        if let Err(e) = writeln!(self.file, "{line}") {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to append to run log");
        }
    }
}
