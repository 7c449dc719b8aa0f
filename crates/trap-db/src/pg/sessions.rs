//! Query functions for the `sessions` table (the gateway liveness mirror).

use sqlx::PgPool;

use crate::models::SessionRow;
use crate::store::StoreResult;

use super::db_err;

pub async fn get_session(pool: &PgPool, session_key: &str) -> StoreResult<Option<SessionRow>> {
    sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_key = $1")
        .bind(session_key)
        .fetch_optional(pool)
        .await
        .map_err(db_err)
}

pub async fn upsert_session(pool: &PgPool, row: &SessionRow) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO sessions \
             (session_key, status, model, input_tokens, output_tokens, \
              total_tokens, last_active_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (session_key) DO UPDATE \
         SET status = EXCLUDED.status, \
             model = EXCLUDED.model, \
             input_tokens = EXCLUDED.input_tokens, \
             output_tokens = EXCLUDED.output_tokens, \
             total_tokens = EXCLUDED.total_tokens, \
             last_active_at = EXCLUDED.last_active_at",
    )
    .bind(&row.session_key)
    .bind(row.status)
    .bind(&row.model)
    .bind(row.input_tokens)
    .bind(row.output_tokens)
    .bind(row.total_tokens)
    .bind(row.last_active_at)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}
