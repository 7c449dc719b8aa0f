//! Review phase: give every in-review task with an open pull request a
//! reviewer agent.

use anyhow::Result;

use trap_db::models::{Project, Resolution, Role, Task, TaskEventType};
use trap_db::store::{NewComment, NewTaskEvent, event_data};

use crate::agents::models::REVIEWER_MODEL;
use crate::agents::{SpawnError, SpawnSpec};
use crate::capacity;
use crate::cycle::CycleEnv;
use crate::github::PrInfo;
use crate::prompt::{self, PromptContext, PromptError};
use crate::rpc::RpcError;
use crate::worktree;

use super::skip_non_fatal;

pub async fn run(env: &CycleEnv, project: &Project) -> Result<()> {
    let Some(repo) = &project.github_repo else {
        return Ok(());
    };

    for task in env
        .store
        .list_tasks(project.id, trap_db::models::TaskStatus::InReview)
        .await?
    {
        // A live or just-ended reviewer means this task is covered.
        if env.agents.has(task.id) {
            continue;
        }
        if env.agents.is_recently_reaped(task.id, Role::Reviewer) {
            continue;
        }

        let branch = task
            .branch
            .clone()
            .unwrap_or_else(|| worktree::branch_for_prefix(&task.short_prefix()));

        let found = match lookup_pr(env, repo, &task, &branch).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "PR lookup failed");
                continue;
            }
        };

        let pr = match found {
            Some(pr) if pr.is_open() => pr,
            Some(pr) if pr.is_merged() => {
                // The PR merged while we were not looking; finish the task.
                let completed = env.store.complete_task(task.id, Resolution::Merged).await;
                skip_non_fatal(completed, task.id, "complete reviewed task")?;
                env.store
                    .insert_event(
                        NewTaskEvent::new(task.id, task.project_id, TaskEventType::PrMerged)
                            .with_actor("work-loop")
                            .with_data(event_data::pr_merged(pr.number)),
                    )
                    .await?;
                env.store
                    .insert_comment(NewComment::system(
                        task.id,
                        format!("Pull request #{} merged; task completed.", pr.number),
                    ))
                    .await?;
                continue;
            }
            _ => continue,
        };

        if capacity::admit(
            &env.agents,
            &env.config.limits,
            project.id,
            project.work_loop_max_agents.map(|n| n as usize),
            Role::Reviewer,
        )
        .is_err()
        {
            // Denial already logged; limits will not change this cycle.
            return Ok(());
        }

        let comments = env.store.list_comments(task.id).await?;
        let signals = env.store.list_signals(task.id).await?;
        let worktree_path = project
            .local_path
            .as_deref()
            .map(|p| worktree::worktree_path(p, &task.short_prefix()))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let message = match prompt::build_prompt(
            env.store.as_ref(),
            &PromptContext {
                task: &task,
                project,
                role: Role::Reviewer,
                model: REVIEWER_MODEL,
                worktree_path,
                branch: branch.clone(),
                comments: &comments,
                signals: &signals,
                pr_number: Some(pr.number),
            },
        )
        .await
        {
            Ok(message) => message,
            Err(PromptError::MissingSoulTemplate { role }) => {
                tracing::error!(
                    event = "prompt_build_failed",
                    task_id = %task.id,
                    role = %role,
                    "no active prompt version; reviewer not spawned"
                );
                continue;
            }
            Err(PromptError::Store(e)) => return Err(e.into()),
        };

        let spawned = env
            .agents
            .spawn(SpawnSpec {
                task_id: task.id,
                project_id: project.id,
                role: Role::Reviewer,
                message,
                model: REVIEWER_MODEL.to_owned(),
                thinking: None,
                timeout_seconds: env.config.agent_timeout_seconds,
            })
            .await;

        let handle = match spawned {
            Ok(handle) => handle,
            Err(SpawnError::Rpc(RpcError::Unavailable)) => {
                tracing::info!("gateway unavailable; review phase skipped this cycle");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "reviewer spawn failed");
                continue;
            }
        };

        env.store
            .set_task_agent(task.id, &handle.run_id, &handle.session_key, &handle.model)
            .await?;
        if task.pr_number.is_none() {
            env.store.set_task_pr(task.id, pr.number).await?;
            env.store
                .insert_event(
                    NewTaskEvent::new(task.id, task.project_id, TaskEventType::PrOpened)
                        .with_actor("work-loop")
                        .with_data(serde_json::json!({ "prNumber": pr.number })),
                )
                .await?;
        }
        if task.branch.is_none() {
            env.store.set_task_branch(task.id, &branch).await?;
        }
        env.store
            .insert_event(
                NewTaskEvent::new(task.id, task.project_id, TaskEventType::AgentAssigned)
                    .with_actor("work-loop")
                    .with_data(event_data::agent_assigned(
                        Role::Reviewer,
                        &handle.session_key,
                        &handle.model,
                    )),
            )
            .await?;
        tracing::info!(
            task_id = %task.id,
            pr_number = pr.number,
            "reviewer assigned"
        );
    }

    Ok(())
}

/// Resolve the task's PR: by recorded number when present, otherwise by
/// searching open PRs whose head branch equals or extends the derived
/// branch.
async fn lookup_pr(
    env: &CycleEnv,
    repo: &str,
    task: &Task,
    branch: &str,
) -> Result<Option<PrInfo>> {
    match task.pr_number {
        Some(number) => env.github.view_pr(repo, number).await,
        None => env.github.find_open_pr_by_branch(repo, branch).await,
    }
}
