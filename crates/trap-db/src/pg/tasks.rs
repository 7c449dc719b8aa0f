//! Query functions for the `tasks` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{POSITION_STEP, Resolution, Role, Task, TaskStatus};
use crate::store::{NewTask, StoreError, StoreResult};

use super::db_err;

/// Insert a new task at the tail of its `(project, status)` lane.
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> StoreResult<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
             (id, project_id, title, description, status, priority, role, \
              assignee, requires_human_review, tags, position) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 COALESCE((SELECT MAX(position) FROM tasks \
                           WHERE project_id = $2 AND status = $5), 0) + $11) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.project_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.status)
    .bind(new.priority)
    .bind(new.role)
    .bind(&new.assignee)
    .bind(new.requires_human_review)
    .bind(&new.tags)
    .bind(POSITION_STEP)
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    Ok(task)
}

pub async fn get_task(pool: &PgPool, id: Uuid) -> StoreResult<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)
}

pub async fn list_tasks(
    pool: &PgPool,
    project_id: Uuid,
    status: TaskStatus,
) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND status = $2 \
         ORDER BY position ASC",
    )
    .bind(project_id)
    .bind(status)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

pub async fn list_tasks_with_pr(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND pr_number IS NOT NULL AND status <> 'done' \
         ORDER BY position ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

/// The atomic claim: `ready -> in_progress` with the incomplete-dependency
/// check inlined, so that of two concurrent claimants exactly one row
/// update wins. The loser gets a [`StoreError::Conflict`] carrying the
/// status it observed.
pub async fn claim_ready_task(pool: &PgPool, task_id: Uuid) -> StoreResult<Task> {
    let claimed = sqlx::query_as::<_, Task>(
        "UPDATE tasks AS t \
         SET status = 'in_progress', \
             position = COALESCE((SELECT MAX(position) FROM tasks x \
                                  WHERE x.project_id = t.project_id \
                                    AND x.status = 'in_progress'), 0) + $2, \
             updated_at = now() \
         WHERE t.id = $1 \
           AND t.status = 'ready' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on_id \
               WHERE td.task_id = t.id AND dep.status <> 'done' \
           ) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(POSITION_STEP)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    if let Some(task) = claimed {
        return Ok(task);
    }

    // No row updated: classify why.
    let task = get_task(pool, task_id).await?.ok_or(StoreError::NotFound {
        kind: "task",
        id: task_id,
    })?;
    if task.status != TaskStatus::Ready {
        return Err(StoreError::Conflict {
            task_id,
            expected: TaskStatus::Ready,
            found: task.status,
        });
    }
    let unmet = super::deps::incomplete_dependencies(pool, task_id).await?;
    Err(StoreError::DependencyUnmet {
        task_id,
        unmet: unmet.len(),
    })
}

/// Optimistic-locked status change.
///
/// - Repositions the row to the tail of the destination lane.
/// - Stamps `completed_at` when entering `done`.
/// - Clears the agent session fields when entering `done`, `ready`, or
///   `backlog`.
/// - Leaving `backlog` additionally requires every dependency to be done.
pub async fn transition_task(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks AS t \
         SET status = $3, \
             position = COALESCE((SELECT MAX(position) FROM tasks x \
                                  WHERE x.project_id = t.project_id \
                                    AND x.status = $3), 0) + $4, \
             completed_at = CASE WHEN $3 = 'done' THEN now() ELSE t.completed_at END, \
             session_id = CASE WHEN $3 IN ('done', 'ready', 'backlog') \
                               THEN NULL ELSE t.session_id END, \
             agent_session_key = CASE WHEN $3 IN ('done', 'ready', 'backlog') \
                                      THEN NULL ELSE t.agent_session_key END, \
             updated_at = now() \
         WHERE t.id = $1 \
           AND t.status = $2 \
           AND ($2 <> 'backlog' OR NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on_id \
               WHERE td.task_id = t.id AND dep.status <> 'done' \
           ))",
    )
    .bind(task_id)
    .bind(from)
    .bind(to)
    .bind(POSITION_STEP)
    .execute(pool)
    .await
    .map_err(db_err)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let task = get_task(pool, task_id).await?.ok_or(StoreError::NotFound {
        kind: "task",
        id: task_id,
    })?;
    if task.status != from {
        return Err(StoreError::Conflict {
            task_id,
            expected: from,
            found: task.status,
        });
    }
    // Status matched, so the backlog dependency guard rejected the change.
    let unmet = super::deps::incomplete_dependencies(pool, task_id).await?;
    Err(StoreError::DependencyUnmet {
        task_id,
        unmet: unmet.len(),
    })
}

pub async fn set_task_agent(
    pool: &PgPool,
    task_id: Uuid,
    session_id: &str,
    session_key: &str,
    model: &str,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET session_id = $2, agent_session_key = $3, agent_model = $4, \
             agent_started_at = now(), agent_last_active_at = now(), \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(session_id)
    .bind(session_key)
    .bind(model)
    .execute(pool)
    .await
    .map_err(db_err)?;

    require_row(result.rows_affected(), task_id)
}

/// `from -> blocked`; clears the agent fields and resets the retry count.
pub async fn block_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks AS t \
         SET status = 'blocked', \
             position = COALESCE((SELECT MAX(position) FROM tasks x \
                                  WHERE x.project_id = t.project_id \
                                    AND x.status = 'blocked'), 0) + $3, \
             session_id = NULL, agent_session_key = NULL, \
             agent_retry_count = 0, updated_at = now() \
         WHERE t.id = $1 AND t.status = $2",
    )
    .bind(task_id)
    .bind(from)
    .bind(POSITION_STEP)
    .execute(pool)
    .await
    .map_err(db_err)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }
    conflict_or_missing(pool, task_id, from).await
}

/// Any non-done status to `done`. A task that is already done is left
/// untouched.
pub async fn complete_task(
    pool: &PgPool,
    task_id: Uuid,
    resolution: Resolution,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks AS t \
         SET status = 'done', resolution = $2, completed_at = now(), \
             position = COALESCE((SELECT MAX(position) FROM tasks x \
                                  WHERE x.project_id = t.project_id \
                                    AND x.status = 'done'), 0) + $3, \
             session_id = NULL, agent_session_key = NULL, \
             updated_at = now() \
         WHERE t.id = $1 AND t.status <> 'done'",
    )
    .bind(task_id)
    .bind(resolution)
    .bind(POSITION_STEP)
    .execute(pool)
    .await
    .map_err(db_err)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }
    // Either already done (fine) or missing.
    match get_task(pool, task_id).await? {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound {
            kind: "task",
            id: task_id,
        }),
    }
}

pub async fn set_task_role_model(
    pool: &PgPool,
    task_id: Uuid,
    role: Option<Role>,
    model: Option<&str>,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET role = COALESCE($2, role), \
             agent_model = COALESCE($3, agent_model), \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(role)
    .bind(model)
    .execute(pool)
    .await
    .map_err(db_err)?;

    require_row(result.rows_affected(), task_id)
}

pub async fn reset_task_escalation(pool: &PgPool, task_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET escalated = FALSE, escalated_at = NULL, agent_retry_count = 0, \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .map_err(db_err)?;

    require_row(result.rows_affected(), task_id)
}

/// Only a blocked task may be escalated (escalated implies blocked).
pub async fn escalate_task(pool: &PgPool, task_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET escalated = TRUE, escalated_at = now(), updated_at = now() \
         WHERE id = $1 AND status = 'blocked'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .map_err(db_err)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }
    conflict_or_missing(pool, task_id, TaskStatus::Blocked).await
}

pub async fn mark_triage_sent(pool: &PgPool, task_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET triage_sent_at = now() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .map_err(db_err)?;
    require_row(result.rows_affected(), task_id)
}

pub async fn mark_triage_acked(pool: &PgPool, task_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET triage_acked_at = now() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .map_err(db_err)?;
    require_row(result.rows_affected(), task_id)
}

pub async fn set_task_branch(pool: &PgPool, task_id: Uuid, branch: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET branch = $2, updated_at = now() WHERE id = $1")
        .bind(task_id)
        .bind(branch)
        .execute(pool)
        .await
        .map_err(db_err)?;
    require_row(result.rows_affected(), task_id)
}

pub async fn set_task_pr(pool: &PgPool, task_id: Uuid, pr_number: i64) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET pr_number = $2, updated_at = now() WHERE id = $1")
        .bind(task_id)
        .bind(pr_number)
        .execute(pool)
        .await
        .map_err(db_err)?;
    require_row(result.rows_affected(), task_id)
}

// -----------------------------------------------------------------------
// Gate scans
// -----------------------------------------------------------------------

/// Ready tasks with no assignee and no incomplete dependencies.
pub async fn ready_unblocked_tasks(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         WHERE t.project_id = $1 \
           AND t.status = 'ready' \
           AND t.assignee IS NULL \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on_id \
               WHERE td.task_id = t.id AND dep.status <> 'done' \
           ) \
         ORDER BY t.position ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

pub async fn stuck_tasks(
    pool: &PgPool,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND status = 'in_progress' AND updated_at < $2 \
         ORDER BY updated_at ASC",
    )
    .bind(project_id)
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

pub async fn unacked_triage_tasks(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND status = 'blocked' \
           AND triage_sent_at IS NOT NULL AND triage_acked_at IS NULL \
         ORDER BY triage_sent_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

fn require_row(rows: u64, task_id: Uuid) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::NotFound {
            kind: "task",
            id: task_id,
        })
    } else {
        Ok(())
    }
}

async fn conflict_or_missing(
    pool: &PgPool,
    task_id: Uuid,
    expected: TaskStatus,
) -> StoreResult<()> {
    match get_task(pool, task_id).await? {
        None => Err(StoreError::NotFound {
            kind: "task",
            id: task_id,
        }),
        Some(t) => Err(StoreError::Conflict {
            task_id,
            expected,
            found: t.status,
        }),
    }
}
