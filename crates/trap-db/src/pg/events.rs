//! Query functions for the append-only `task_events` audit log.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskEvent;
use crate::store::{NewTaskEvent, StoreResult};

use super::db_err;

pub async fn insert_event(pool: &PgPool, new: &NewTaskEvent) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO task_events (id, task_id, project_id, event_type, actor, data) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(new.task_id)
    .bind(new.project_id)
    .bind(new.event_type)
    .bind(&new.actor)
    .bind(&new.data)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn list_events(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<TaskEvent>> {
    sqlx::query_as::<_, TaskEvent>(
        "SELECT * FROM task_events WHERE task_id = $1 ORDER BY timestamp ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}
