//! GitHub access for the cleanup and review phases.
//!
//! Everything goes through the `gh` CLI via [`ProcessRunner`], behind
//! the [`GitHubClient`] trait so phases can be tested without a network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::process::ProcessRunner;

/// State of a pull request as reported by `gh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// The slice of PR metadata the supervisor needs.
#[derive(Debug, Clone)]
pub struct PrInfo {
    pub number: i64,
    pub state: PrState,
    pub head_ref: String,
}

impl PrInfo {
    pub fn is_open(&self) -> bool {
        self.state == PrState::Open
    }

    pub fn is_merged(&self) -> bool {
        self.state == PrState::Merged
    }
}

/// Read-only GitHub queries used by the phases.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Look up one PR by number. `None` when it does not exist.
    async fn view_pr(&self, repo: &str, number: i64) -> Result<Option<PrInfo>>;

    /// First open PR whose head branch equals `branch` or starts with it.
    async fn find_open_pr_by_branch(&self, repo: &str, branch: &str) -> Result<Option<PrInfo>>;

    /// Which of `candidates` are merged. One batched listing per call,
    /// intersected locally, rather than one subprocess per task.
    async fn merged_pr_numbers(&self, repo: &str, candidates: &[i64]) -> Result<Vec<i64>>;
}

// ---------------------------------------------------------------------------
// gh CLI implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPrRow {
    number: i64,
    state: PrState,
    head_ref_name: String,
}

impl From<GhPrRow> for PrInfo {
    fn from(row: GhPrRow) -> Self {
        Self {
            number: row.number,
            state: row.state,
            head_ref: row.head_ref_name,
        }
    }
}

/// [`GitHubClient`] backed by the `gh` binary.
pub struct GhCli {
    runner: Arc<ProcessRunner>,
    timeout: Duration,
}

impl GhCli {
    pub fn new(runner: Arc<ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl GitHubClient for GhCli {
    async fn view_pr(&self, repo: &str, number: i64) -> Result<Option<PrInfo>> {
        let number_arg = number.to_string();
        let output = self
            .runner
            .run(
                &[
                    "gh",
                    "pr",
                    "view",
                    &number_arg,
                    "--repo",
                    repo,
                    "--json",
                    "number,state,headRefName",
                ],
                None,
                self.timeout,
            )
            .await?;

        if !output.success() {
            // "Could not resolve" / "no pull requests found" means absent.
            if output.stderr.contains("Could not resolve")
                || output.stderr.contains("no pull requests found")
            {
                return Ok(None);
            }
            anyhow::bail!("gh pr view {number} failed: {}", output.stderr.trim());
        }

        let row: GhPrRow =
            serde_json::from_str(&output.stdout).context("unparseable gh pr view output")?;
        Ok(Some(row.into()))
    }

    async fn find_open_pr_by_branch(&self, repo: &str, branch: &str) -> Result<Option<PrInfo>> {
        let output = self
            .runner
            .run(
                &[
                    "gh",
                    "pr",
                    "list",
                    "--repo",
                    repo,
                    "--state",
                    "open",
                    "--json",
                    "number,state,headRefName",
                ],
                None,
                self.timeout,
            )
            .await?;

        if !output.success() {
            anyhow::bail!("gh pr list failed: {}", output.stderr.trim());
        }

        let rows: Vec<GhPrRow> =
            serde_json::from_str(&output.stdout).context("unparseable gh pr list output")?;
        Ok(rows
            .into_iter()
            .find(|r| r.head_ref_name == branch || r.head_ref_name.starts_with(branch))
            .map(PrInfo::from))
    }

    async fn merged_pr_numbers(&self, repo: &str, candidates: &[i64]) -> Result<Vec<i64>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let output = self
            .runner
            .run(
                &[
                    "gh",
                    "pr",
                    "list",
                    "--repo",
                    repo,
                    "--state",
                    "merged",
                    "--limit",
                    "200",
                    "--json",
                    "number",
                ],
                None,
                self.timeout,
            )
            .await?;

        if !output.success() {
            anyhow::bail!("gh pr list --state merged failed: {}", output.stderr.trim());
        }

        #[derive(Deserialize)]
        struct NumberRow {
            number: i64,
        }
        let rows: Vec<NumberRow> =
            serde_json::from_str(&output.stdout).context("unparseable gh pr list output")?;

        let merged: std::collections::HashSet<i64> = rows.into_iter().map(|r| r.number).collect();
        Ok(candidates
            .iter()
            .copied()
            .filter(|n| merged.contains(n))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_state_parses_gh_casing() {
        let row: GhPrRow = serde_json::from_str(
            r#"{"number": 42, "state": "MERGED", "headRefName": "fix/aaaaaaaa"}"#,
        )
        .unwrap();
        let info = PrInfo::from(row);
        assert_eq!(info.number, 42);
        assert!(info.is_merged());
        assert!(!info.is_open());
        assert_eq!(info.head_ref, "fix/aaaaaaaa");
    }
}
