//! Query functions for the `projects` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Project;
use crate::store::{StoreError, StoreResult};

use super::db_err;

pub async fn insert_project(pool: &PgPool, project: &Project) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO projects \
             (id, slug, name, color, repo_url, local_path, github_repo, \
              chat_layout, work_loop_enabled, work_loop_max_agents, \
              work_loop_schedule, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(project.id)
    .bind(&project.slug)
    .bind(&project.name)
    .bind(&project.color)
    .bind(&project.repo_url)
    .bind(&project.local_path)
    .bind(&project.github_repo)
    .bind(project.chat_layout)
    .bind(project.work_loop_enabled)
    .bind(project.work_loop_max_agents)
    .bind(&project.work_loop_schedule)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

pub async fn get_project(pool: &PgPool, id: Uuid) -> StoreResult<Option<Project>> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)
}

pub async fn get_project_by_slug(pool: &PgPool, slug: &str) -> StoreResult<Option<Project>> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await
        .map_err(db_err)
}

pub async fn list_enabled_projects(pool: &PgPool) -> StoreResult<Vec<Project>> {
    sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE work_loop_enabled ORDER BY slug ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

/// Delete a project; tasks and their children go with it via cascade.
pub async fn delete_project(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            kind: "project",
            id,
        });
    }
    Ok(())
}
