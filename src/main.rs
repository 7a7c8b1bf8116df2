mod config;
mod console;
mod gitops;
mod lock;
mod logfile;
mod monitor;
mod process;
mod signals;
mod supervisor;

use clap::Parser;
use std::path::PathBuf;

use crate::process::GroupControl;
use crate::supervisor::RunOutcome;

/// Runs a single long-lived backfill job under supervision: kills and
/// restarts it on hangs and crashes (bounded retries), guarantees the
/// whole process group dies with it, and commits the produced data on
/// success. Only one instance runs per host at a time.
#[derive(Parser, Debug)]
#[command(name = "backfill-watchdog", version, about)]
struct Cli {
    /// Provider to backfill (e.g. visa, mastercard)
    #[arg(long)]
    provider: String,

    /// Number of days to backfill
    #[arg(long)]
    days: u32,

    /// Config file path
    #[arg(short, long, default_value = "watchdog.toml")]
    config: PathBuf,

    /// Hang timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Max attempts (overrides config)
    #[arg(long)]
    retries: Option<u32>,

    /// Cooldown between attempts in seconds (overrides config)
    #[arg(long)]
    cooldown: Option<u64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (poll ticks, kill decisions)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let mut config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            console::error(&e);
            return 1;
        }
    };
    if let Some(timeout) = cli.timeout {
        config.monitor.hang_timeout_secs = timeout;
    }
    if let Some(retries) = cli.retries {
        config.supervisor.max_attempts = retries;
    }
    if let Some(cooldown) = cli.cooldown {
        config.supervisor.cooldown_secs = cooldown;
    }

    if cli.dry_run {
        println!("{config:#?}");
        println!("Dry run mode — config validated, not running.");
        return 0;
    }

    println!();
    console::info(&format!(
        "{}Backfill Watchdog{}",
        console::BOLD,
        console::RESET
    ));
    console::info(&format!(
        "Provider: {} | Days: {}",
        cli.provider, cli.days
    ));
    console::dim(&format!(
        "Hang timeout: {}s | Max attempts: {}",
        config.monitor.hang_timeout_secs, config.supervisor.max_attempts
    ));

    // Held for the rest of the run; released on drop, whichever exit
    // path is taken below.
    let _guard = match lock::acquire(&config.lock.dir) {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            console::warn("Another instance is already running, exiting");
            return 1;
        }
        Err(e) => {
            console::error(&format!("Failed to acquire lock: {e}"));
            return 1;
        }
    };

    let mut sink = match logfile::RunLog::create(&config.log.dir, &cli.provider, true) {
        Ok(log) => log,
        Err(e) => {
            console::error(&format!("Failed to create log file: {e}"));
            return 1;
        }
    };
    console::dim(&format!("Log file: {}", sink.path().display()));
    println!();

    let publisher = gitops::GitPublisher::new(&config.job.project_root, &config.git);
    let active = supervisor::ActiveGroup::default();

    tokio::select! {
        outcome = supervisor::run_supervised(
            &config,
            &cli.provider,
            cli.days,
            &mut sink,
            &publisher,
            &active,
        ) => match outcome {
            RunOutcome::Success => {
                console::success("All done!");
                0
            }
            RunOutcome::JobFailed(_) | RunOutcome::PublishFailed(_) => 1,
        },
        _ = signals::wait_for_interrupt() => {
            console::warn("Interrupted, shutting down");
            if let Some(pgid) = active.current() {
                let ctl = process::GroupController {
                    grace_period: config.process.kill_grace(),
                };
                ctl.terminate(pgid);
            }
            1
        }
    }
}
