//! Query functions for the `task_dependencies` table.
//!
//! Cycle checking happens in the trait's provided `add_dependency`; these
//! functions are the raw edge operations it is built on.

use sqlx::PgPool;
use uuid::Uuid;

use crate::store::StoreResult;

use super::db_err;

/// Insert a dependency edge. `ON CONFLICT DO NOTHING` keeps this
/// idempotent.
pub async fn insert_dependency_edge(
    pool: &PgPool,
    task_id: Uuid,
    depends_on_id: Uuid,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn dependencies_of(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .map_err(db_err)?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn dependents_of(pool: &PgPool, depends_on_id: Uuid) -> StoreResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT task_id FROM task_dependencies WHERE depends_on_id = $1")
            .bind(depends_on_id)
            .fetch_all(pool)
            .await
            .map_err(db_err)?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Direct dependencies whose status is not `done`.
pub async fn incomplete_dependencies(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT td.depends_on_id FROM task_dependencies td \
         JOIN tasks dep ON dep.id = td.depends_on_id \
         WHERE td.task_id = $1 AND dep.status <> 'done'",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
