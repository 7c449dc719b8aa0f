//! Query functions for the `signals` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Signal;
use crate::store::{NewSignal, StoreError, StoreResult};

use super::db_err;

/// Insert a signal; `blocking` is derived from the kind, never supplied.
pub async fn insert_signal(pool: &PgPool, new: &NewSignal) -> StoreResult<Signal> {
    sqlx::query_as::<_, Signal>(
        "INSERT INTO signals \
             (id, task_id, session_key, agent_id, kind, severity, message, blocking) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.task_id)
    .bind(&new.session_key)
    .bind(&new.agent_id)
    .bind(new.kind)
    .bind(new.severity)
    .bind(&new.message)
    .bind(new.kind.is_blocking())
    .fetch_one(pool)
    .await
    .map_err(db_err)
}

pub async fn list_signals(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<Signal>> {
    sqlx::query_as::<_, Signal>(
        "SELECT * FROM signals WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

/// Record a response exactly once. The `responded_at IS NULL` guard makes
/// the update race-free; a second call leaves the row unchanged and fails
/// with [`StoreError::AlreadyResponded`].
pub async fn respond_signal(pool: &PgPool, signal_id: Uuid, response: &str) -> StoreResult<Signal> {
    let updated = sqlx::query_as::<_, Signal>(
        "UPDATE signals \
         SET responded_at = now(), response = $2 \
         WHERE id = $1 AND responded_at IS NULL \
         RETURNING *",
    )
    .bind(signal_id)
    .bind(response)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    if let Some(signal) = updated {
        return Ok(signal);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM signals WHERE id = $1)")
        .bind(signal_id)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

    if exists {
        Err(StoreError::AlreadyResponded(signal_id))
    } else {
        Err(StoreError::NotFound {
            kind: "signal",
            id: signal_id,
        })
    }
}

/// Blocking, unanswered signals for a project, newest first.
pub async fn pending_blocking_signals(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Signal>> {
    sqlx::query_as::<_, Signal>(
        "SELECT s.* FROM signals s \
         JOIN tasks t ON t.id = s.task_id \
         WHERE t.project_id = $1 \
           AND s.blocking \
           AND s.responded_at IS NULL \
         ORDER BY s.created_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}
