//! Per-task git worktrees and their cleanup.
//!
//! Agents work in detached worktrees under `<local_path>-worktrees/fix/`,
//! one directory per task named by the first eight hex characters of the
//! task id. The sweeper enumerates those directories, checks whether a
//! tree is clean, and removes worktrees and remote branches that belong
//! to finished tasks. Every git invocation is timeboxed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::process::ProcessRunner;

/// Branch prefix for task branches: `fix/<prefix8>`.
pub const BRANCH_PREFIX: &str = "fix/";

/// Worktree base for a project: `<local_path>-worktrees`.
pub fn worktree_base(local_path: &str) -> PathBuf {
    PathBuf::from(format!("{local_path}-worktrees"))
}

/// Worktree directory for a task prefix.
pub fn worktree_path(local_path: &str, prefix: &str) -> PathBuf {
    worktree_base(local_path).join("fix").join(prefix)
}

/// Fallback branch name for a task prefix.
pub fn branch_for_prefix(prefix: &str) -> String {
    format!("{BRANCH_PREFIX}{prefix}")
}

/// A candidate worktree directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixWorktree {
    /// Eight-hex-char task id prefix (the directory name).
    pub prefix: String,
    pub path: PathBuf,
}

/// Sweeps task worktrees for a project repository.
pub struct WorktreeSweeper {
    runner: Arc<ProcessRunner>,
    short_timeout: Duration,
    remove_timeout: Duration,
}

impl WorktreeSweeper {
    pub fn new(
        runner: Arc<ProcessRunner>,
        short_timeout: Duration,
        remove_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            short_timeout,
            remove_timeout,
        }
    }

    /// Enumerate `<local_path>-worktrees/fix/<prefix>` directories.
    ///
    /// Only names that look like a task id prefix (exactly eight hex
    /// characters) qualify; anything else is ignored.
    pub fn list_fix_worktrees(&self, local_path: &str) -> Vec<FixWorktree> {
        let dir = worktree_base(local_path).join("fix");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.len() == 8 && name.chars().all(|c| c.is_ascii_hexdigit()) {
                found.push(FixWorktree {
                    prefix: name.to_owned(),
                    path,
                });
            }
        }
        found.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        found
    }

    /// A worktree is clean when `git status --porcelain` prints nothing.
    pub async fn is_clean(&self, worktree: &Path) -> Result<bool> {
        let output = self
            .runner
            .run(
                &["git", "status", "--porcelain"],
                Some(worktree),
                self.short_timeout,
            )
            .await
            .context("git status failed")?;
        if !output.success() {
            anyhow::bail!("git status failed: {}", output.stderr.trim());
        }
        Ok(output.stdout.trim().is_empty())
    }

    /// `git worktree remove --force` from the main repository.
    pub async fn remove(&self, local_path: &str, worktree: &Path) -> Result<()> {
        let worktree_arg = worktree.to_string_lossy();
        let output = self
            .runner
            .run(
                &["git", "worktree", "remove", "--force", &worktree_arg],
                Some(Path::new(local_path)),
                self.remove_timeout,
            )
            .await
            .context("git worktree remove failed")?;
        if !output.success() {
            // Already gone is fine; this sweep is idempotent.
            if output.stderr.contains("is not a working tree") {
                return Ok(());
            }
            anyhow::bail!("git worktree remove failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    /// Whether `origin/<branch>` still exists.
    pub async fn remote_branch_exists(&self, local_path: &str, branch: &str) -> Result<bool> {
        let refspec = format!("refs/heads/{branch}");
        let output = self
            .runner
            .run(
                &["git", "ls-remote", "--heads", "origin", &refspec],
                Some(Path::new(local_path)),
                self.short_timeout,
            )
            .await
            .context("git ls-remote failed")?;
        if !output.success() {
            anyhow::bail!("git ls-remote failed: {}", output.stderr.trim());
        }
        Ok(!output.stdout.trim().is_empty())
    }

    /// Delete `origin/<branch>`.
    pub async fn delete_remote_branch(&self, local_path: &str, branch: &str) -> Result<()> {
        let output = self
            .runner
            .run(
                &["git", "push", "origin", "--delete", branch],
                Some(Path::new(local_path)),
                self.remove_timeout,
            )
            .await
            .context("git push --delete failed")?;
        if !output.success() {
            // Remote already pruned the branch.
            if output.stderr.contains("remote ref does not exist") {
                return Ok(());
            }
            anyhow::bail!("git push --delete failed: {}", output.stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn sweeper() -> WorktreeSweeper {
        WorktreeSweeper::new(
            Arc::new(ProcessRunner::new()),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
    }

    /// Create a git repo at `<dir>/repo` with one commit.
    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo_path = dir.path().join("repo");
        std::fs::create_dir_all(&repo_path).unwrap();

        let run = |args: &[&str]| {
            let output = Command::new("git")
                .args(args)
                .current_dir(&repo_path)
                .output()
                .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
            assert!(output.status.success(), "git {} failed", args.join(" "));
        };

        run(&["init"]);
        run(&["config", "user.email", "test@trap.dev"]);
        run(&["config", "user.name", "Trap Test"]);
        std::fs::write(repo_path.join("README.md"), "# Test\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "Initial commit"]);

        (dir, repo_path)
    }

    #[test]
    fn path_layout() {
        assert_eq!(
            worktree_path("/srv/app", "aaaaaaaa"),
            PathBuf::from("/srv/app-worktrees/fix/aaaaaaaa")
        );
        assert_eq!(branch_for_prefix("deadbeef"), "fix/deadbeef");
    }

    #[test]
    fn list_skips_non_prefix_directories() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("repo");
        let local_str = local.to_string_lossy().to_string();
        let fix_dir = worktree_base(&local_str).join("fix");
        std::fs::create_dir_all(fix_dir.join("aaaaaaaa")).unwrap();
        std::fs::create_dir_all(fix_dir.join("deadbeef")).unwrap();
        std::fs::create_dir_all(fix_dir.join("not-a-prefix")).unwrap();
        std::fs::create_dir_all(fix_dir.join("abcd")).unwrap();

        let found = sweeper().list_fix_worktrees(&local_str);
        let prefixes: Vec<&str> = found.iter().map(|w| w.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["aaaaaaaa", "deadbeef"]);
    }

    #[test]
    fn list_missing_base_is_empty() {
        let found = sweeper().list_fix_worktrees("/nonexistent/path");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn clean_and_dirty_worktrees() {
        let (_dir, repo_path) = create_temp_repo();
        let repo_str = repo_path.to_string_lossy().to_string();
        let sweeper = sweeper();

        // Create a real worktree via git.
        let wt_path = worktree_path(&repo_str, "aaaaaaaa");
        std::fs::create_dir_all(wt_path.parent().unwrap()).unwrap();
        let output = Command::new("git")
            .args(["worktree", "add", "-b", "fix/aaaaaaaa"])
            .arg(&wt_path)
            .current_dir(&repo_path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "worktree add failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );

        assert!(sweeper.is_clean(&wt_path).await.unwrap());

        std::fs::write(wt_path.join("scratch.txt"), "wip\n").unwrap();
        assert!(!sweeper.is_clean(&wt_path).await.unwrap());

        // Forced removal works even though the tree is dirty.
        sweeper.remove(&repo_str, &wt_path).await.unwrap();
        assert!(!wt_path.exists());

        // Second removal is a no-op.
        sweeper.remove(&repo_str, &wt_path).await.unwrap();
    }
}
