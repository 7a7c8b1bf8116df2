use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from watchdog.toml.
///
/// Every tunable the supervisor needs is carried here explicitly so tests
/// can inject short timeouts and temporary paths instead of patching
/// process-wide constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatchdogConfig {
    pub job: JobConfig,
    pub monitor: MonitorConfig,
    pub supervisor: SupervisorConfig,
    pub process: ProcessConfig,
    pub lock: LockConfig,
    pub log: LogConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Executable for the backfill job.
    pub command: String,
    /// Arguments; `{provider}` and `{days}` placeholders are substituted.
    pub args: Vec<String>,
    /// Working directory the job runs in.
    pub project_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Kill the job if it produces no output for this long.
    pub hang_timeout_secs: u64,
    /// Bounded wait per output read; also the silence re-check cadence.
    pub poll_interval_millis: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_attempts: u32,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Wait this long after SIGTERM before probing the group and escalating.
    pub kill_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Token directory shared by all invocations on this host.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Subdirectory of the project root holding the produced data.
    pub data_dir: String,
    pub commit_message: String,
    pub author: String,
}

// --- Default implementations ---

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            command: "bun".to_string(),
            args: vec![
                "run".to_string(),
                "backfill".to_string(),
                "--".to_string(),
                "--provider={provider}".to_string(),
                "--days={days}".to_string(),
            ],
            project_root: PathBuf::from("."),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hang_timeout_secs: 900,
            poll_interval_millis: 1000,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_secs: 30,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            kill_grace_secs: 15,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/forexradar-backfill.lock"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        let dir = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("Library/Logs/ForexRadar"))
            .unwrap_or_else(|| PathBuf::from("/tmp/forexradar-logs"));
        Self { dir }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            data_dir: "db".to_string(),
            commit_message: "data: mc update".to_string(),
            author: "Avish <avish.j@protonmail.com>".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn hang_timeout(&self) -> Duration {
        Duration::from_secs(self.hang_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

impl SupervisorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ProcessConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// Load configuration from a TOML file.
///
/// A missing file is not an error: the watchdog runs fine on pure
/// defaults. A file that exists but fails to parse is.
pub fn load(path: &Path) -> Result<WatchdogConfig, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WatchdogConfig::default());
        }
        Err(e) => return Err(format!("Failed to read {}: {e}", path.display())),
    };
    toml::from_str(&raw).map_err(|e| format!("Failed to parse {}: {e}", path.display()))
}
