//! Bounded subprocess execution.
//!
//! Every external command (`git`, `gh`) goes through [`ProcessRunner`]:
//! argv array, explicit working directory, hard timeout. Nothing is ever
//! interpolated into a shell string.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs subprocesses with a timeout. Stateless; clone freely.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `argv` in `cwd` (or the inherited directory), waiting at most
    /// `timeout`. A timeout kills the child and returns an error.
    pub async fn run(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty argv");
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("failed to run {program}"))?,
            Err(_) => bail!(
                "{} timed out after {:.0?}",
                argv.join(" "),
                timeout
            ),
        };

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner::new();
        let out = runner
            .run(&["echo", "hello"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let runner = ProcessRunner::new();
        let out = runner
            .run(&["false"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
    }

    #[tokio::test]
    async fn empty_argv_is_an_error() {
        let runner = ProcessRunner::new();
        assert!(runner.run(&[], None, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&["sleep", "30"], None, Duration::from_millis(100))
            .await;
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("timed out"), "unexpected: {message}");
    }
}
