//! Supervisor-level interrupt handling.
//!
//! An interrupt to the watchdog itself must run the same cleanup path as
//! a hang kill: tear down the job's process group and let the run lock
//! drop, rather than orphaning either.

use tokio::signal::unix::{signal, SignalKind};

/// Completes when SIGINT or SIGTERM is delivered to the supervisor.
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
