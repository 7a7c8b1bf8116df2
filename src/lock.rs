//! Host-local exclusive run token.
//!
//! The token is a directory created atomically with `create_dir`, holding
//! a `pid` file naming the owner. A token is valid only while its recorded
//! owner is alive; tokens left behind by dead owners are reclaimed.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that can occur while acquiring the run token.
#[derive(Debug)]
pub enum LockError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Io { path, source } => {
                write!(f, "lock I/O error at {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Io { source, .. } => Some(source),
        }
    }
}

/// Held run token. Releasing happens on `Drop`, so the token cannot
/// outlive the supervisor on any exit path.
#[derive(Debug)]
pub struct LockGuard {
    dir: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Release the token explicitly. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        release(&self.dir);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Attempt to acquire the run token.
///
/// Returns `Ok(Some(guard))` when acquired, `Ok(None)` when another live
/// run holds it. A token whose recorded owner is dead (or unreadable) is
/// treated as stale: it is destroyed and acquisition is retried once.
pub fn acquire(dir: &Path) -> Result<Option<LockGuard>, LockError> {
    acquire_inner(dir, true)
}

fn acquire_inner(dir: &Path, reclaim_stale: bool) -> Result<Option<LockGuard>, LockError> {
    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    match fs::create_dir(dir) {
        Ok(()) => {
            let pid_file = dir.join("pid");
            fs::write(&pid_file, std::process::id().to_string()).map_err(|e| LockError::Io {
                path: pid_file,
                source: e,
            })?;
            tracing::debug!(dir = %dir.display(), "acquired run lock");
            Ok(Some(LockGuard {
                dir: dir.to_path_buf(),
                released: false,
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            match holder(dir) {
                Some(pid) if holder_alive(pid) => {
                    tracing::debug!(holder = pid, "run lock held by live process");
                    Ok(None)
                }
                _ if reclaim_stale => {
                    tracing::warn!(dir = %dir.display(), "removing stale lock from dead process");
                    release(dir);
                    acquire_inner(dir, false)
                }
                _ => Ok(None),
            }
        }
        Err(e) => Err(LockError::Io {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove the pid file and the token directory. Tolerates either (or
/// both) already being gone, so release is idempotent.
pub fn release(dir: &Path) {
    let _ = fs::remove_file(dir.join("pid"));
    let _ = fs::remove_dir(dir);
}

/// Read the recorded owner pid, if present and parseable.
fn holder(dir: &Path) -> Option<i32> {
    let raw = fs::read_to_string(dir.join("pid")).ok()?;
    raw.trim().parse().ok()
}

/// Liveness probe via a null signal. `EPERM` means the process exists
/// under another uid and must count as alive, never as stale.
fn holder_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}
