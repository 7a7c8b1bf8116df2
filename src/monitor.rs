//! Output-driven liveness monitoring.
//!
//! The monitor never blocks longer than the poll interval: each read of
//! the job's output is raced against a short timeout, and every timed-out
//! poll is an opportunity to re-check silence duration and process
//! liveness. Detection latency is therefore bounded by the poll interval,
//! not by I/O readiness.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStderr, ChildStdout};

use crate::logfile::OutputSink;
use crate::process::{GroupControl, JobChild};

/// Outcome of one supervised attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Job exited 0.
    Success,
    /// Job exited non-zero; signal deaths carry the negated signal number.
    Crashed(i32),
    /// Job was killed for silence, or monitoring itself failed.
    Hung,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Silence longer than this gets the job killed.
    pub hang_timeout: Duration,
    /// Bounded wait per output read.
    pub poll_interval: Duration,
}

/// Upper bound on reaping after a kill; the group has already been
/// SIGTERMed/SIGKILLed by the time this wait runs.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

type StdoutLines = Lines<BufReader<ChildStdout>>;
type StderrLines = Lines<BufReader<ChildStderr>>;

/// Drive one attempt to completion: forward output lines to the sink in
/// arrival order, reset the silence clock on each, and classify the
/// attempt as `Success`, `Crashed`, or `Hung`.
pub async fn run_monitor<S, C>(
    child: &mut JobChild,
    settings: &MonitorSettings,
    sink: &mut S,
    ctl: &C,
) -> Outcome
where
    S: OutputSink,
    C: GroupControl,
{
    let mut stdout = child.take_stdout().map(|s| BufReader::new(s).lines());
    let mut stderr = child.take_stderr().map(|s| BufReader::new(s).lines());
    let mut last_output = Instant::now();

    loop {
        let read = tokio::time::timeout(
            settings.poll_interval,
            next_line(&mut stdout, &mut stderr),
        )
        .await;

        match read {
            Ok(Some(Ok(line))) => {
                sink.write_line(&line);
                // Reset strictly after the line is fully read, never
                // optimistically.
                last_output = Instant::now();
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "error reading job output");
                return fail_attempt(child, sink, ctl, &format!("monitoring error: {e}")).await;
            }
            // Both pipes at end-of-stream: distinct from "no data ready
            // yet". Collect the exit status.
            Ok(None) => return collect_status(child, settings, sink, ctl, last_output).await,
            Err(_) => {
                let silent = last_output.elapsed();
                if silent >= settings.hang_timeout {
                    return fail_attempt(
                        child,
                        sink,
                        ctl,
                        &format!("killed due to hang after {}s of silence", silent.as_secs()),
                    )
                    .await;
                }
                match child.try_wait() {
                    // Exited with nothing left in the pipes: a clean fast
                    // exit, not a hang.
                    Ok(Some(status)) => return exit_outcome(status, sink),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "error probing job status");
                        return fail_attempt(child, sink, ctl, &format!("monitoring error: {e}"))
                            .await;
                    }
                }
            }
        }
    }
}

/// Wait for the next complete line from either pipe. Returns `None` once
/// both pipes have reached end-of-stream.
async fn next_line(
    stdout: &mut Option<StdoutLines>,
    stderr: &mut Option<StderrLines>,
) -> Option<std::io::Result<String>> {
    loop {
        tokio::select! {
            res = next_from(stdout), if stdout.is_some() => match res {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => *stdout = None,
                Err(e) => return Some(Err(e)),
            },
            res = next_from(stderr), if stderr.is_some() => match res {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => *stderr = None,
                Err(e) => return Some(Err(e)),
            },
            else => return None,
        }
    }
}

async fn next_from<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines.as_mut() {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Output is done but the job may still be running with its pipes closed,
/// so status collection stays on the poll cadence and the silence
/// threshold keeps applying.
async fn collect_status<S, C>(
    child: &mut JobChild,
    settings: &MonitorSettings,
    sink: &mut S,
    ctl: &C,
    last_output: Instant,
) -> Outcome
where
    S: OutputSink,
    C: GroupControl,
{
    loop {
        match tokio::time::timeout(settings.poll_interval, child.wait()).await {
            Ok(Ok(status)) => return exit_outcome(status, sink),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for job");
                return fail_attempt(child, sink, ctl, &format!("monitoring error: {e}")).await;
            }
            Err(_) => {
                let silent = last_output.elapsed();
                if silent >= settings.hang_timeout {
                    return fail_attempt(
                        child,
                        sink,
                        ctl,
                        &format!(
                            "killed due to hang after {}s of silence (output closed)",
                            silent.as_secs()
                        ),
                    )
                    .await;
                }
            }
        }
    }
}

fn exit_outcome<S: OutputSink>(status: ExitStatus, sink: &mut S) -> Outcome {
    let code = status
        .code()
        .unwrap_or_else(|| status.signal().map(|s| -s).unwrap_or(-1));
    sink.write_line(&format!("[watchdog] process exited with code {code}"));
    tracing::info!(code, "job exited");
    if code == 0 {
        Outcome::Success
    } else {
        Outcome::Crashed(code)
    }
}

/// Kill the job's whole group, note why in the log, and reap the leader
/// so no zombie outlives the attempt.
async fn fail_attempt<S, C>(child: &mut JobChild, sink: &mut S, ctl: &C, reason: &str) -> Outcome
where
    S: OutputSink,
    C: GroupControl,
{
    sink.write_line(&format!("[watchdog] {reason}"));
    tracing::warn!(pid = child.pid(), reason, "terminating job");
    ctl.terminate(child.pgid());
    let _ = tokio::time::timeout(REAP_TIMEOUT, child.wait()).await;
    Outcome::Hung
}
