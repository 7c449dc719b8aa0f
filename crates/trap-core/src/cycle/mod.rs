//! The per-project cycle driver.
//!
//! One cycle runs `cleanup -> review -> work` for a single project,
//! guarded by a per-project mutex so a slow cycle can never overlap its
//! own next tick. Phase failures are logged as run records and later
//! phases still run; only an unreachable store aborts the cycle.

pub mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use trap_db::models::Project;
use trap_db::store::Store;

use crate::agents::AgentManager;
use crate::browser::BrowserControl;
use crate::config::WorkLoopConfig;
use crate::github::GitHubClient;
use crate::phases::{self, is_store_unavailable};
use crate::worktree::WorktreeSweeper;

/// Shared collaborators handed to every phase.
pub struct CycleEnv {
    pub store: Arc<dyn Store>,
    pub agents: Arc<AgentManager>,
    pub github: Arc<dyn GitHubClient>,
    pub worktrees: Arc<WorktreeSweeper>,
    pub browser: Option<Arc<BrowserControl>>,
    pub config: WorkLoopConfig,
}

/// Outcome of one `run_cycle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran; `cycle` is the project's monotonic cycle number.
    Ran { cycle: u64 },
    /// Another cycle of the same project was still running.
    SkippedLocked,
}

/// Runs cycles, one per project at a time.
pub struct CycleDriver {
    env: CycleEnv,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    cycle_numbers: Mutex<HashMap<Uuid, u64>>,
}

impl CycleDriver {
    pub fn new(env: CycleEnv) -> Self {
        Self {
            env,
            locks: Mutex::new(HashMap::new()),
            cycle_numbers: Mutex::new(HashMap::new()),
        }
    }

    pub fn env(&self) -> &CycleEnv {
        &self.env
    }

    fn project_lock(&self, project_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(project_id).or_default())
    }

    fn next_cycle_number(&self, project_id: Uuid) -> u64 {
        let mut numbers = self.cycle_numbers.lock().unwrap_or_else(|e| e.into_inner());
        let counter = numbers.entry(project_id).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Run one cycle for a project, or skip if one is already running.
    pub async fn run_cycle(&self, project_id: Uuid) -> Result<CycleOutcome> {
        let lock = self.project_lock(project_id);
        let Ok(_guard) = lock.try_lock() else {
            tracing::debug!(project_id = %project_id, "cycle still running, skipping tick");
            return Ok(CycleOutcome::SkippedLocked);
        };

        let project = self
            .env
            .store
            .get_project(project_id)
            .await
            .context("project lookup failed")?;
        let Some(project) = project else {
            bail!("project {project_id} not found");
        };

        let cycle = self.next_cycle_number(project_id);
        tracing::debug!(project = %project.slug, cycle, "cycle starting");

        self.run_phases(&project, cycle).await?;

        tracing::debug!(project = %project.slug, cycle, "cycle finished");
        Ok(CycleOutcome::Ran { cycle })
    }

    /// Phases run strictly in order. A phase error is a run record, not
    /// a cycle abort, unless the store itself is unreachable.
    async fn run_phases(&self, project: &Project, cycle: u64) -> Result<()> {
        let steps: [(&str, PhaseFuture<'_>); 3] = [
            ("cleanup", Box::pin(phases::cleanup::run(&self.env, project))),
            ("review", Box::pin(phases::review::run(&self.env, project))),
            ("work", Box::pin(phases::work::run(&self.env, project))),
        ];

        for (phase, future) in steps {
            if let Err(error) = future.await {
                if is_store_unavailable(&error) {
                    tracing::error!(
                        project = %project.slug,
                        cycle,
                        phase,
                        error = %error,
                        "store unreachable, aborting cycle"
                    );
                    return Err(error);
                }
                tracing::error!(
                    project = %project.slug,
                    cycle,
                    phase,
                    error = %error,
                    "phase failed; continuing with next phase"
                );
            }
        }
        Ok(())
    }
}

type PhaseFuture<'a> = std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
