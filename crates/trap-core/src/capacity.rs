//! Admission control: may another agent start right now?

use std::fmt;

use uuid::Uuid;

use trap_db::models::Role;

use crate::agents::AgentManager;

/// Ceilings applied before any spawn.
#[derive(Debug, Clone)]
pub struct CapacityLimits {
    pub max_agents_global: usize,
    pub max_agents_per_project: usize,
    pub max_dev_agents: usize,
    pub max_reviewer_agents: usize,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            max_agents_global: 6,
            max_agents_per_project: 3,
            max_dev_agents: 4,
            max_reviewer_agents: 2,
        }
    }
}

/// Which ceiling rejected the spawn. Logged verbatim on every denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    GlobalLimit,
    ProjectLimit,
    DevLimit,
    ReviewerLimit,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalLimit => "global_limit",
            Self::ProjectLimit => "project_limit",
            Self::DevLimit => "dev_limit",
            Self::ReviewerLimit => "reviewer_limit",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check every applicable ceiling for spawning `role` in `project_id`.
///
/// `project_cap` is the project's own `work_loop_max_agents` override,
/// when set. Denials are traced with a stable `reason` field and the
/// counts that tripped the limit.
pub fn admit(
    manager: &AgentManager,
    limits: &CapacityLimits,
    project_id: Uuid,
    project_cap: Option<usize>,
    role: Role,
) -> Result<(), DenialReason> {
    let global = manager.active_count(None, None);
    if global >= limits.max_agents_global {
        deny(DenialReason::GlobalLimit, global, limits.max_agents_global)?;
    }

    let per_project = project_cap.unwrap_or(limits.max_agents_per_project);
    let in_project = manager.active_count(Some(project_id), None);
    if in_project >= per_project {
        deny(DenialReason::ProjectLimit, in_project, per_project)?;
    }

    match role {
        Role::Dev => {
            let devs = manager.active_count(None, Some(Role::Dev));
            if devs >= limits.max_dev_agents {
                deny(DenialReason::DevLimit, devs, limits.max_dev_agents)?;
            }
        }
        Role::Reviewer => {
            let reviewers = manager.active_count(None, Some(Role::Reviewer));
            if reviewers >= limits.max_reviewer_agents {
                deny(
                    DenialReason::ReviewerLimit,
                    reviewers,
                    limits.max_reviewer_agents,
                )?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn deny(reason: DenialReason, active: usize, limit: usize) -> Result<(), DenialReason> {
    tracing::info!(
        event = "capacity_check",
        reason = reason.as_str(),
        active,
        limit,
        "capacity limit reached"
    );
    Err(reason)
}
