//! Process-group lifecycle for the supervised job.
//!
//! The job is spawned as leader of a fresh process group so the whole
//! tree (the backfill runner plus any browser-automation children it
//! forks) can be signalled as a unit. Termination escalates: SIGTERM to
//! the group, a grace period, then SIGKILL only if survivors remain.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Errors that can occur while managing the job process.
#[derive(Debug)]
pub enum ProcessError {
    /// Failed to spawn the job.
    Spawn { source: std::io::Error },
    /// The spawned child reported no PID.
    NoPid,
    /// Failed to wait on the job.
    Wait { source: std::io::Error },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Spawn { source } => {
                write!(f, "failed to spawn job: {}", source)
            }
            ProcessError::NoPid => write!(f, "spawned job did not report a PID"),
            ProcessError::Wait { source } => {
                write!(f, "failed to wait for job: {}", source)
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Spawn { source } => Some(source),
            ProcessError::NoPid => None,
            ProcessError::Wait { source } => Some(source),
        }
    }
}

/// The spawned job, leader of its own process group.
#[derive(Debug)]
pub struct JobChild {
    pid: Pid,
    child: Child,
}

impl JobChild {
    /// Process ID, for logging.
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Process group ID (equal to the PID for group leaders).
    pub fn pgid(&self) -> Pid {
        self.pid
    }

    /// Take the stdout handle for async reading, if not already taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if not already taken.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>, ProcessError> {
        self.child
            .try_wait()
            .map_err(|e| ProcessError::Wait { source: e })
    }

    /// Wait for the job to exit and reap it.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, ProcessError> {
        self.child
            .wait()
            .await
            .map_err(|e| ProcessError::Wait { source: e })
    }
}

/// Spawn the job command in its own process group, with stdout and
/// stderr piped for monitoring. The environment is inherited.
pub fn spawn_job(command: &str, args: &[String], cwd: &Path) -> Result<JobChild, ProcessError> {
    tracing::info!(command, ?args, cwd = %cwd.display(), "spawning backfill job");

    let mut child = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // new group so the whole job tree can be killed
        .spawn()
        .map_err(|e| ProcessError::Spawn { source: e })?;

    let raw_pid = child.id().ok_or(ProcessError::NoPid)?;
    let pid = Pid::from_raw(raw_pid as i32);
    tracing::info!(pid = raw_pid, "job started in new process group");

    Ok(JobChild { pid, child })
}

/// How a group termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The group was gone after the grace period (or before SIGTERM).
    Graceful,
    /// Survivors remained after the grace period and were SIGKILLed.
    Forced,
}

/// Capability seam for group teardown, so tests can substitute a double
/// that records calls or simulates signal-ignoring children.
pub trait GroupControl {
    fn terminate(&self, pgid: Pid) -> Termination;
}

/// The real controller: SIGTERM, grace period, probe, SIGKILL.
#[derive(Debug, Clone)]
pub struct GroupController {
    pub grace_period: Duration,
}

impl GroupControl for GroupController {
    fn terminate(&self, pgid: Pid) -> Termination {
        tracing::warn!(%pgid, "sending SIGTERM to process group");
        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Group already gone; termination is idempotent.
                tracing::debug!(%pgid, "process group already exited");
                return Termination::Graceful;
            }
            Err(e) => {
                tracing::warn!(%pgid, error = %e, "failed to SIGTERM process group");
            }
        }

        std::thread::sleep(self.grace_period);

        // Null-signal probe: does anything in the group survive?
        match killpg(pgid, None) {
            Ok(()) => {
                tracing::warn!(%pgid, "process group still alive, sending SIGKILL");
                match killpg(pgid, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => {
                        tracing::warn!(%pgid, error = %e, "failed to SIGKILL process group");
                    }
                }
                Termination::Forced
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(%pgid, "process group exited within grace period");
                Termination::Graceful
            }
            Err(e) => {
                tracing::warn!(%pgid, error = %e, "could not probe process group");
                Termination::Graceful
            }
        }
    }
}
