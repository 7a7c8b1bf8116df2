//! Publish a successful run: stage the data directory, commit with
//! signoff, push to the configured remote.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::GitConfig;

/// Boundary the supervisor publishes through after a successful job.
/// Tests substitute a fake; production uses [`GitPublisher`].
pub trait Publisher {
    fn has_pending_changes(&self) -> Result<bool, String>;
    fn commit_and_push(&self) -> Result<(), String>;
}

pub struct GitPublisher {
    project_root: PathBuf,
    data_dir: String,
    commit_message: String,
    author: String,
}

impl GitPublisher {
    pub fn new(project_root: &Path, git: &GitConfig) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            data_dir: git.data_dir.clone(),
            commit_message: git.commit_message.clone(),
            author: git.author.clone(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output, String> {
        Command::new("git")
            .args(args)
            .current_dir(&self.project_root)
            .output()
            .map_err(|e| format!("Failed to run git {}: {e}", args.join(" ")))
    }

    fn git_ok(&self, args: &[&str], label: &str) -> Result<(), String> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("git {label} failed: {}", stderr.trim()));
        }
        Ok(())
    }
}

impl Publisher for GitPublisher {
    fn has_pending_changes(&self) -> Result<bool, String> {
        let output = self.git(&["status", "--porcelain", &self.data_dir])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("git status failed: {}", stderr.trim()));
        }
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn commit_and_push(&self) -> Result<(), String> {
        tracing::info!(data_dir = %self.data_dir, "staging data changes");
        self.git_ok(&["add", &self.data_dir], "add")?;

        tracing::info!(message = %self.commit_message, "committing");
        let author = format!("--author={}", self.author);
        self.git_ok(
            &["commit", "-m", &self.commit_message, "-s", &author],
            "commit",
        )?;

        tracing::info!("pushing to remote");
        self.git_ok(&["push"], "push")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&status.stderr)
        );
    }

    /// A work repo with one commit, tracking a local bare remote so
    /// `git push` has somewhere to go.
    fn repo_with_remote(root: &Path) -> PathBuf {
        let bare = root.join("remote.git");
        let work = root.join("work");
        fs::create_dir_all(&bare).unwrap();
        fs::create_dir_all(&work).unwrap();

        run_git(&bare, &["init", "--bare", "-b", "main", "."]);
        run_git(&work, &["init", "-b", "main", "."]);
        run_git(&work, &["config", "user.email", "watchdog@test"]);
        run_git(&work, &["config", "user.name", "Watchdog Test"]);
        run_git(
            &work,
            &["remote", "add", "origin", bare.to_str().unwrap()],
        );

        fs::write(work.join("README"), "seed\n").unwrap();
        run_git(&work, &["add", "README"]);
        run_git(&work, &["commit", "-m", "seed"]);
        run_git(&work, &["push", "-u", "origin", "main"]);
        work
    }

    fn publisher(work: &Path) -> GitPublisher {
        GitPublisher::new(work, &GitConfig::default())
    }

    #[test]
    fn test_clean_data_dir_has_no_pending_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let work = repo_with_remote(tmp.path());
        assert!(!publisher(&work).has_pending_changes().unwrap());
    }

    #[test]
    fn test_new_data_file_is_a_pending_change() {
        let tmp = tempfile::tempdir().unwrap();
        let work = repo_with_remote(tmp.path());
        fs::create_dir_all(work.join("db")).unwrap();
        fs::write(work.join("db/rates.json"), "{}").unwrap();
        assert!(publisher(&work).has_pending_changes().unwrap());
    }

    #[test]
    fn test_change_outside_data_dir_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let work = repo_with_remote(tmp.path());
        fs::write(work.join("unrelated.txt"), "x").unwrap();
        assert!(!publisher(&work).has_pending_changes().unwrap());
    }

    #[test]
    fn test_commit_and_push_publishes_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let work = repo_with_remote(tmp.path());
        fs::create_dir_all(work.join("db")).unwrap();
        fs::write(work.join("db/rates.json"), "{}").unwrap();

        publisher(&work).commit_and_push().unwrap();

        assert!(!publisher(&work).has_pending_changes().unwrap());
        let log = Command::new("git")
            .args(["log", "-1", "--pretty=%s"])
            .current_dir(&work)
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&log.stdout).trim(),
            GitConfig::default().commit_message
        );
    }

    #[test]
    fn test_push_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let work = repo_with_remote(tmp.path());
        // Break the remote so push has nowhere to go.
        fs::remove_dir_all(tmp.path().join("remote.git")).unwrap();
        fs::create_dir_all(work.join("db")).unwrap();
        fs::write(work.join("db/rates.json"), "{}").unwrap();

        let err = publisher(&work).commit_and_push().unwrap_err();
        assert!(err.contains("push"), "unexpected error: {err}");
    }

    #[test]
    fn test_status_failure_outside_repo_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let not_a_repo = tmp.path().join("plain");
        fs::create_dir_all(&not_a_repo).unwrap();
        assert!(publisher(&not_a_repo).has_pending_changes().is_err());
    }
}
