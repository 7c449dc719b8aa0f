//! Cleanup phase: reap, ghost sweep, merged-PR sweep, orphan worktrees,
//! merged remote branches, stale browser tabs.
//!
//! Each step is independent; a failure in one is logged and the next
//! still runs. Only store unavailability propagates.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;

use trap_db::models::{Resolution, TaskEventType, TaskStatus};
use trap_db::store::{NewComment, NewTaskEvent, event_data};

use crate::cycle::CycleEnv;
use trap_db::models::Project;

use super::skip_non_fatal;

pub async fn run(env: &CycleEnv, project: &Project) -> Result<()> {
    reap_finished_agents(env).await?;
    ghost_sweep(env, project).await?;
    merged_pr_sweep(env, project).await?;
    orphan_worktree_sweep(env, project).await?;
    merged_remote_branch_sweep(env, project).await?;
    browser_tab_sweep(env).await;
    Ok(())
}

/// Retire handles whose sessions ended and audit the removals.
async fn reap_finished_agents(env: &CycleEnv) -> Result<()> {
    let reaped = env.agents.reap().await?;
    for r in &reaped {
        env.store
            .insert_event(
                NewTaskEvent::new(
                    r.handle.task_id,
                    r.handle.project_id,
                    TaskEventType::AgentReaped,
                )
                .with_actor("work-loop")
                .with_data(event_data::agent_reaped(
                    r.handle.role,
                    &r.handle.session_key,
                    r.session_status,
                )),
            )
            .await?;
    }
    Ok(())
}

/// A task still holding an agent session key whose session is gone or
/// terminal. In-progress ghosts go to `blocked` for triage; in-review
/// ghosts are logged only (the review phase respawns reviewers itself).
async fn ghost_sweep(env: &CycleEnv, project: &Project) -> Result<()> {
    let now = Utc::now();
    let grace =
        chrono::Duration::from_std(env.config.ghost_grace).unwrap_or(chrono::Duration::minutes(2));

    for status in [TaskStatus::InProgress, TaskStatus::InReview] {
        for task in env.store.list_tasks(project.id, status).await? {
            let Some(session_key) = task.agent_session_key.clone() else {
                continue;
            };
            let session = env.store.get_session(&session_key).await?;
            let is_ghost = match &session {
                // Not in the sessions table at all: allow a spawn grace
                // before declaring the agent lost.
                None => now - task.updated_at > grace,
                Some(s) => s.status.is_terminal(),
            };
            if !is_ghost {
                continue;
            }

            if status == TaskStatus::InReview {
                tracing::warn!(
                    event = "ghost_task_in_review",
                    task_id = %task.id,
                    session_key = %session_key,
                    "in-review task has a dead session; leaving for the review phase"
                );
                continue;
            }

            match env.store.block_task(task.id, TaskStatus::InProgress).await {
                Ok(()) => {
                    env.store
                        .insert_comment(NewComment::system(
                            task.id,
                            "Agent session ended without completing the task; moved to blocked.",
                        ))
                        .await?;
                    tracing::warn!(
                        event = "ghost_task_blocked",
                        task_id = %task.id,
                        session_key = %session_key,
                        "in-progress ghost moved to blocked"
                    );
                }
                Err(e) => skip_non_fatal(Err(e), task.id, "block ghost task")?,
            }
        }
    }
    Ok(())
}

/// Any non-done task with a PR that quietly merged gets completed. This
/// recovers from PRs merged outside the review phase.
async fn merged_pr_sweep(env: &CycleEnv, project: &Project) -> Result<()> {
    let Some(repo) = &project.github_repo else {
        return Ok(());
    };

    let tasks = env.store.list_tasks_with_pr(project.id).await?;
    let numbers: Vec<i64> = tasks.iter().filter_map(|t| t.pr_number).collect();
    if numbers.is_empty() {
        return Ok(());
    }

    let merged = match env.github.merged_pr_numbers(repo, &numbers).await {
        Ok(merged) => merged,
        Err(e) => {
            tracing::warn!(error = %e, "merged-PR sweep skipped: gh query failed");
            return Ok(());
        }
    };
    let merged: HashSet<i64> = merged.into_iter().collect();

    for task in tasks {
        let Some(pr_number) = task.pr_number else {
            continue;
        };
        if !merged.contains(&pr_number) {
            continue;
        }

        let completed = env.store.complete_task(task.id, Resolution::Merged).await;
        skip_non_fatal(completed, task.id, "complete merged-PR task")?;
        env.store
            .insert_event(
                NewTaskEvent::new(task.id, task.project_id, TaskEventType::PrMerged)
                    .with_actor("work-loop")
                    .with_data(event_data::pr_merged(pr_number)),
            )
            .await?;
        env.store
            .insert_comment(NewComment::system(
                task.id,
                format!("Pull request #{pr_number} merged; task completed."),
            ))
            .await?;
        tracing::info!(
            event = "task_auto_completed_merged_pr",
            task_id = %task.id,
            pr_number,
            "task completed from merged PR"
        );
    }
    Ok(())
}

/// Remove worktrees of finished tasks. Never touches a prefix that
/// belongs to an in-progress or in-review task, and never removes a
/// dirty tree.
async fn orphan_worktree_sweep(env: &CycleEnv, project: &Project) -> Result<()> {
    let Some(local_path) = &project.local_path else {
        return Ok(());
    };

    let mut live = HashSet::new();
    for status in [TaskStatus::InProgress, TaskStatus::InReview] {
        for task in env.store.list_tasks(project.id, status).await? {
            live.insert(task.short_prefix());
        }
    }
    let done: HashSet<String> = env
        .store
        .list_tasks(project.id, TaskStatus::Done)
        .await?
        .iter()
        .map(|t| t.short_prefix())
        .collect();

    for worktree in env.worktrees.list_fix_worktrees(local_path) {
        if live.contains(&worktree.prefix) {
            continue;
        }
        if !done.contains(&worktree.prefix) {
            // Unknown prefix: likely another process's work, leave it.
            continue;
        }
        match env.worktrees.is_clean(&worktree.path).await {
            Ok(true) => match env.worktrees.remove(local_path, &worktree.path).await {
                Ok(()) => {
                    tracing::info!(path = %worktree.path.display(), "removed orphan worktree");
                }
                Err(e) => {
                    tracing::warn!(path = %worktree.path.display(), error = %e, "worktree removal failed");
                }
            },
            Ok(false) => {
                tracing::debug!(path = %worktree.path.display(), "orphan worktree dirty, keeping");
            }
            Err(e) => {
                tracing::warn!(path = %worktree.path.display(), error = %e, "worktree status failed");
            }
        }
    }
    Ok(())
}

/// Delete remote branches of done tasks whose PR merged.
async fn merged_remote_branch_sweep(env: &CycleEnv, project: &Project) -> Result<()> {
    let (Some(local_path), Some(repo)) = (&project.local_path, &project.github_repo) else {
        return Ok(());
    };

    let done: Vec<_> = env
        .store
        .list_tasks(project.id, TaskStatus::Done)
        .await?
        .into_iter()
        .filter(|t| t.branch.is_some() && t.pr_number.is_some())
        .collect();
    let numbers: Vec<i64> = done.iter().filter_map(|t| t.pr_number).collect();
    if numbers.is_empty() {
        return Ok(());
    }

    let merged: HashSet<i64> = match env.github.merged_pr_numbers(repo, &numbers).await {
        Ok(merged) => merged.into_iter().collect(),
        Err(e) => {
            tracing::warn!(error = %e, "remote-branch sweep skipped: gh query failed");
            return Ok(());
        }
    };

    for task in done {
        let (Some(branch), Some(pr_number)) = (&task.branch, task.pr_number) else {
            continue;
        };
        if !merged.contains(&pr_number) {
            continue;
        }
        match env.worktrees.remote_branch_exists(local_path, branch).await {
            Ok(true) => {
                if let Err(e) = env.worktrees.delete_remote_branch(local_path, branch).await {
                    tracing::warn!(branch = %branch, error = %e, "remote branch delete failed");
                } else {
                    tracing::info!(branch = %branch, "deleted merged remote branch");
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(branch = %branch, error = %e, "remote branch check failed");
            }
        }
    }
    Ok(())
}

/// Close stale agent-opened browser tabs. Entirely best-effort.
async fn browser_tab_sweep(env: &CycleEnv) {
    let Some(browser) = &env.browser else {
        return;
    };
    match browser
        .close_matching_tabs(&env.config.browser_tab_patterns)
        .await
    {
        Ok(0) => {}
        Ok(closed) => tracing::info!(closed, "closed stale browser tabs"),
        Err(e) => tracing::debug!(error = %e, "browser tab sweep failed"),
    }
}
