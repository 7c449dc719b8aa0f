//! Work phase: claim the single best ready task and hand it to an agent.
//!
//! Ordering is priority (urgent first) then lane position. The store's
//! claim transition is the race arbiter; a lost claim just moves on to
//! the next candidate. At most one task is claimed per cycle.

use anyhow::Result;

use trap_db::models::{Project, Role, TaskEventType, TaskStatus};
use trap_db::store::{NewTaskEvent, StoreError, event_data};

use crate::agents::models::model_for_role;
use crate::agents::{SpawnError, SpawnSpec};
use crate::capacity;
use crate::cycle::CycleEnv;
use crate::prompt::{self, PromptContext, PromptError};
use crate::rpc::RpcError;
use crate::worktree;

pub async fn run(env: &CycleEnv, project: &Project) -> Result<()> {
    // Capacity first: global, project, and the dev pool the claim will
    // almost certainly draw from.
    if capacity::admit(
        &env.agents,
        &env.config.limits,
        project.id,
        project.work_loop_max_agents.map(|n| n as usize),
        Role::Dev,
    )
    .is_err()
    {
        return Ok(());
    }

    let mut candidates = env.store.list_tasks(project.id, TaskStatus::Ready).await?;
    candidates.sort_by_key(|t| (t.priority.rank(), t.position));

    for task in candidates {
        let unmet = env.store.incomplete_dependencies(task.id).await?;
        if !unmet.is_empty() {
            tracing::info!(
                event = "dependency_blocked",
                task_id = %task.id,
                unmet = unmet.len(),
                "skipping ready task with open dependencies"
            );
            continue;
        }

        // The atomic claim point: exactly one claimant wins.
        let claimed = match env.store.claim_ready_task(task.id).await {
            Ok(claimed) => claimed,
            Err(StoreError::Conflict { found, .. }) => {
                tracing::info!(
                    event = "claim_failed",
                    task_id = %task.id,
                    found = %found,
                    "task claimed elsewhere"
                );
                continue;
            }
            Err(StoreError::DependencyUnmet { unmet, .. }) => {
                tracing::info!(
                    event = "dependency_blocked",
                    task_id = %task.id,
                    unmet,
                    "dependency completed out from under the claim"
                );
                continue;
            }
            Err(e @ StoreError::Unavailable(_)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "claim failed");
                continue;
            }
        };

        let role = claimed.role.unwrap_or(Role::Dev);
        // Honor a model set at triage time; otherwise the role map.
        let model = claimed
            .agent_model
            .clone()
            .unwrap_or_else(|| model_for_role(role).to_owned());

        let comments = env.store.list_comments(claimed.id).await?;
        let signals = env.store.list_signals(claimed.id).await?;
        let prefix = claimed.short_prefix();
        let branch = claimed
            .branch
            .clone()
            .unwrap_or_else(|| worktree::branch_for_prefix(&prefix));
        let worktree_path = project
            .local_path
            .as_deref()
            .map(|p| worktree::worktree_path(p, &prefix))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let message = match prompt::build_prompt(
            env.store.as_ref(),
            &PromptContext {
                task: &claimed,
                project,
                role,
                model: &model,
                worktree_path,
                branch,
                comments: &comments,
                signals: &signals,
                pr_number: claimed.pr_number,
            },
        )
        .await
        {
            Ok(message) => message,
            Err(PromptError::MissingSoulTemplate { role }) => {
                tracing::error!(
                    event = "prompt_build_failed",
                    task_id = %claimed.id,
                    role = %role,
                    "no active prompt version; reverting claim"
                );
                env.store.revert_task_to_ready(claimed.id).await?;
                continue;
            }
            Err(PromptError::Store(e)) => return Err(e.into()),
        };

        let spawned = env
            .agents
            .spawn(SpawnSpec {
                task_id: claimed.id,
                project_id: project.id,
                role,
                message,
                model: model.clone(),
                thinking: None,
                timeout_seconds: env.config.agent_timeout_seconds,
            })
            .await;

        let handle = match spawned {
            Ok(handle) => handle,
            Err(SpawnError::Rpc(RpcError::Unavailable)) => {
                env.store.revert_task_to_ready(claimed.id).await?;
                tracing::info!("gateway unavailable; work phase skipped this cycle");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(task_id = %claimed.id, error = %e, "spawn failed; reverting claim");
                env.store.revert_task_to_ready(claimed.id).await?;
                continue;
            }
        };

        env.store
            .set_task_agent(claimed.id, &handle.run_id, &handle.session_key, &handle.model)
            .await?;
        env.store
            .insert_event(
                NewTaskEvent::new(claimed.id, project.id, TaskEventType::StatusChanged)
                    .with_actor("work-loop")
                    .with_data(event_data::status_changed(
                        TaskStatus::Ready,
                        TaskStatus::InProgress,
                    )),
            )
            .await?;
        env.store
            .insert_event(
                NewTaskEvent::new(claimed.id, project.id, TaskEventType::AgentAssigned)
                    .with_actor("work-loop")
                    .with_data(event_data::agent_assigned(
                        role,
                        &handle.session_key,
                        &handle.model,
                    )),
            )
            .await?;
        tracing::info!(
            task_id = %claimed.id,
            role = %role,
            model = %handle.model,
            "claimed task and spawned agent"
        );

        // One claim per cycle; ordering stays observable.
        return Ok(());
    }

    Ok(())
}
