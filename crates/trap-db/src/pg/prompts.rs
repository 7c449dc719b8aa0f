//! Query functions for the `prompt_versions` table.
//!
//! Versions are immutable except for the `active` flag. Creating a new
//! version increments the scope's version counter and deactivates the
//! previous active row in one transaction, so the partial unique index on
//! `(role, model) WHERE active` never sees two active rows.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PromptVersion, Role};
use crate::store::StoreResult;

use super::db_err;

pub async fn active_prompt_version(
    pool: &PgPool,
    role: Role,
    model: Option<&str>,
) -> StoreResult<Option<PromptVersion>> {
    sqlx::query_as::<_, PromptVersion>(
        "SELECT * FROM prompt_versions \
         WHERE role = $1 AND model IS NOT DISTINCT FROM $2 AND active",
    )
    .bind(role)
    .bind(model)
    .fetch_optional(pool)
    .await
    .map_err(db_err)
}

pub async fn create_prompt_version(
    pool: &PgPool,
    role: Role,
    model: Option<&str>,
    content: &str,
) -> StoreResult<PromptVersion> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    let next: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_versions \
         WHERE role = $1 AND model IS NOT DISTINCT FROM $2",
    )
    .bind(role)
    .bind(model)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "UPDATE prompt_versions SET active = FALSE \
         WHERE role = $1 AND model IS NOT DISTINCT FROM $2 AND active",
    )
    .bind(role)
    .bind(model)
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    let row = sqlx::query_as::<_, PromptVersion>(
        "INSERT INTO prompt_versions (id, role, model, version, content, active) \
         VALUES ($1, $2, $3, $4, $5, TRUE) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(role)
    .bind(model)
    .bind(next)
    .bind(content)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(row)
}
