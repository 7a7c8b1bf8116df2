//! The supervisor loop: spawn the job, monitor it, classify the attempt,
//! retry with a cooldown up to the attempt budget, and publish on
//! overall success.

use chrono::Local;
use nix::unistd::Pid;
use std::sync::{Arc, Mutex};

use crate::config::WatchdogConfig;
use crate::console;
use crate::gitops::Publisher;
use crate::logfile::OutputSink;
use crate::monitor::{run_monitor, MonitorSettings, Outcome};
use crate::process::{spawn_job, GroupController};

/// Terminal result of a whole supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// All attempts failed; carries the last attempt's outcome.
    JobFailed(Outcome),
    /// The job succeeded but committing/pushing its data did not.
    PublishFailed(String),
}

/// Process group of the attempt currently being monitored, shared with
/// the interrupt path so a Ctrl-C can tear the live group down.
#[derive(Debug, Clone, Default)]
pub struct ActiveGroup(Arc<Mutex<Option<Pid>>>);

impl ActiveGroup {
    fn set(&self, pgid: Pid) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(pgid);
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<Pid> {
        self.0.lock().ok().and_then(|slot| *slot)
    }
}

/// Substitute `{provider}` and `{days}` placeholders in the configured
/// argument template.
fn render_args(args: &[String], provider: &str, days: u32) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{provider}", provider)
                .replace("{days}", &days.to_string())
        })
        .collect()
}

fn write_banner<S: OutputSink>(sink: &mut S, command_line: &str) {
    sink.write_line(&"=".repeat(60));
    sink.write_line(&format!("Run started: {}", Local::now().format("%+")));
    sink.write_line(&format!("Command: {command_line}"));
    sink.write_line(&"=".repeat(60));
}

/// Run the job under supervision until it succeeds or the attempt budget
/// is exhausted, then publish the produced data.
///
/// The caller holds the run lock; this function assumes exclusivity.
pub async fn run_supervised<S, P>(
    config: &WatchdogConfig,
    provider: &str,
    days: u32,
    sink: &mut S,
    publisher: &P,
    active: &ActiveGroup,
) -> RunOutcome
where
    S: OutputSink,
    P: Publisher,
{
    let settings = MonitorSettings {
        hang_timeout: config.monitor.hang_timeout(),
        poll_interval: config.monitor.poll_interval(),
    };
    let ctl = GroupController {
        grace_period: config.process.kill_grace(),
    };
    let args = render_args(&config.job.args, provider, days);
    let command_line = format!("{} {}", config.job.command, args.join(" "));
    let max_attempts = config.supervisor.max_attempts;

    let mut success = false;
    let mut last = Outcome::Crashed(-1);

    for attempt in 1..=max_attempts {
        console::info(&format!("Attempt {attempt}/{max_attempts}"));
        console::info(&format!("Executing: {command_line}"));
        write_banner(sink, &command_line);

        let outcome = match spawn_job(&config.job.command, &args, &config.job.project_root) {
            Ok(mut child) => {
                active.set(child.pgid());
                let outcome = run_monitor(&mut child, &settings, sink, &ctl).await;
                active.clear();
                outcome
            }
            Err(e) => {
                // No exit code to report; counts as a crashed attempt and
                // is retried like one.
                tracing::error!(error = %e, "failed to start job");
                console::error(&format!("Failed to start job: {e}"));
                sink.write_line(&format!("[watchdog] failed to start job: {e}"));
                Outcome::Crashed(-1)
            }
        };

        match outcome {
            Outcome::Success => {
                console::success("Backfill completed successfully");
                success = true;
                break;
            }
            Outcome::Crashed(code) => {
                console::error(&format!("Backfill failed (exit code: {code})"));
                last = outcome;
            }
            Outcome::Hung => {
                console::error("Backfill failed (no output, killed)");
                last = outcome;
            }
        }

        if attempt < max_attempts {
            console::warn(&format!(
                "Restarting in {} seconds...",
                config.supervisor.cooldown_secs
            ));
            tokio::time::sleep(config.supervisor.cooldown()).await;
        }
    }

    if !success {
        console::error(&format!("All {max_attempts} attempts failed"));
        return RunOutcome::JobFailed(last);
    }

    match publisher.has_pending_changes() {
        Ok(false) => {
            console::dim("No changes to commit");
            RunOutcome::Success
        }
        Ok(true) => match publisher.commit_and_push() {
            Ok(()) => {
                console::success("Changes committed and pushed successfully");
                RunOutcome::Success
            }
            Err(e) => {
                console::error(&format!("Failed to commit/push changes: {e}"));
                RunOutcome::PublishFailed(e)
            }
        },
        Err(e) => {
            console::error(&format!("Failed to check for changes: {e}"));
            RunOutcome::PublishFailed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct VecSink {
        lines: Vec<String>,
    }

    impl OutputSink for VecSink {
        fn write_line(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }
    }

    struct FakePublisher {
        pending: bool,
        fail_push: bool,
        commits: Cell<u32>,
    }

    impl FakePublisher {
        fn new(pending: bool) -> Self {
            Self {
                pending,
                fail_push: false,
                commits: Cell::new(0),
            }
        }
    }

    impl Publisher for FakePublisher {
        fn has_pending_changes(&self) -> Result<bool, String> {
            Ok(self.pending)
        }

        fn commit_and_push(&self) -> Result<(), String> {
            self.commits.set(self.commits.get() + 1);
            if self.fail_push {
                Err("push rejected".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn test_config(root: &std::path::Path, script: &str, max_attempts: u32) -> WatchdogConfig {
        let mut config = WatchdogConfig::default();
        config.job.command = "sh".to_string();
        config.job.args = vec!["-c".to_string(), script.to_string()];
        config.job.project_root = root.to_path_buf();
        config.monitor.hang_timeout_secs = 5;
        config.monitor.poll_interval_millis = 100;
        config.supervisor.max_attempts = max_attempts;
        config.supervisor.cooldown_secs = 0;
        config.process.kill_grace_secs = 1;
        config
    }

    fn banner_count(sink: &VecSink) -> usize {
        sink.lines
            .iter()
            .filter(|l| l.starts_with("Run started:"))
            .count()
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_publishes() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "echo done", 3);
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(true);
        let active = ActiveGroup::default();

        let outcome =
            run_supervised(&config, "mastercard", 160, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(publisher.commits.get(), 1);
        assert_eq!(banner_count(&sink), 1);
        assert!(sink.lines.iter().any(|l| l == "done"));
    }

    #[tokio::test]
    async fn test_no_pending_changes_skips_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "echo done", 1);
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(false);
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(publisher.commits.get(), 0);
    }

    #[tokio::test]
    async fn test_crash_exhausts_attempts_without_publishing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "exit 2", 2);
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(true);
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::JobFailed(Outcome::Crashed(2)));
        assert_eq!(publisher.commits.get(), 0);
        assert_eq!(banner_count(&sink), 2);
    }

    #[tokio::test]
    async fn test_recovers_after_crash() {
        // Fails on the first attempt, succeeds once the marker exists.
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(
            tmp.path(),
            "if [ -f marker ]; then echo ok; else touch marker; exit 1; fi",
            3,
        );
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(true);
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(publisher.commits.get(), 1);
        assert_eq!(banner_count(&sink), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_downgrades_successful_job() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), "echo done", 1);
        let mut sink = VecSink::default();
        let mut publisher = FakePublisher::new(true);
        publisher.fail_push = true;
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(
            outcome,
            RunOutcome::PublishFailed("push rejected".to_string())
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retried_then_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path(), "", 2);
        config.job.command = "nonexistent-binary-xyz".to_string();
        config.job.args = vec![];
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(true);
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::JobFailed(Outcome::Crashed(-1)));
        assert_eq!(publisher.commits.get(), 0);
    }

    #[tokio::test]
    async fn test_hung_job_is_killed_and_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path(), "echo tick; sleep 30", 1);
        config.monitor.hang_timeout_secs = 1;
        let mut sink = VecSink::default();
        let publisher = FakePublisher::new(true);
        let active = ActiveGroup::default();

        let outcome = run_supervised(&config, "visa", 1, &mut sink, &publisher, &active).await;

        assert_eq!(outcome, RunOutcome::JobFailed(Outcome::Hung));
        assert_eq!(publisher.commits.get(), 0);
        assert!(active.current().is_none());
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let args = vec![
            "run".to_string(),
            "backfill".to_string(),
            "--".to_string(),
            "--provider={provider}".to_string(),
            "--days={days}".to_string(),
        ];
        let rendered = render_args(&args, "mastercard", 160);
        assert_eq!(
            rendered,
            vec![
                "run",
                "backfill",
                "--",
                "--provider=mastercard",
                "--days=160"
            ]
        );
    }

    #[test]
    fn test_render_args_without_placeholders_is_identity() {
        let args = vec!["-c".to_string(), "echo hi".to_string()];
        assert_eq!(render_args(&args, "visa", 1), args);
    }

    #[test]
    fn test_active_group_set_clear() {
        let active = ActiveGroup::default();
        assert!(active.current().is_none());
        active.set(Pid::from_raw(1234));
        assert_eq!(active.current(), Some(Pid::from_raw(1234)));
        active.clear();
        assert!(active.current().is_none());
    }
}
