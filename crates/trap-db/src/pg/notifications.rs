//! Query functions for the `notifications` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Notification;
use crate::store::{NewNotification, StoreResult};

use super::db_err;

pub async fn insert_notification(
    pool: &PgPool,
    new: &NewNotification,
) -> StoreResult<Notification> {
    sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications \
             (id, task_id, project_id, kind, severity, title, message, agent) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.task_id)
    .bind(new.project_id)
    .bind(new.kind)
    .bind(new.severity)
    .bind(&new.title)
    .bind(&new.message)
    .bind(&new.agent)
    .fetch_one(pool)
    .await
    .map_err(db_err)
}

pub async fn unread_escalation_count(pool: &PgPool, project_id: Uuid) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications \
         WHERE project_id = $1 AND kind = 'escalation' AND NOT read",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    Ok(count)
}
