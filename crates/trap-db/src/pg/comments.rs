//! Query functions for the `comments` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Comment;
use crate::store::{NewComment, StoreResult};

use super::db_err;

pub async fn insert_comment(pool: &PgPool, new: &NewComment) -> StoreResult<Comment> {
    sqlx::query_as::<_, Comment>(
        "INSERT INTO comments (id, task_id, author, author_type, content, kind) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.task_id)
    .bind(&new.author)
    .bind(new.author_type)
    .bind(&new.content)
    .bind(new.kind)
    .fetch_one(pool)
    .await
    .map_err(db_err)
}

pub async fn list_comments(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<Comment>> {
    sqlx::query_as::<_, Comment>(
        "SELECT * FROM comments WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

/// `request_input` comments without a response, scoped to one project.
pub async fn pending_request_inputs(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Comment>> {
    sqlx::query_as::<_, Comment>(
        "SELECT c.* FROM comments c \
         JOIN tasks t ON t.id = c.task_id \
         WHERE t.project_id = $1 \
           AND c.kind = 'request_input' \
           AND c.responded_at IS NULL \
         ORDER BY c.created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(db_err)
}
