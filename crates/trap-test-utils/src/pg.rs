//! Env-gated temporary-database helpers for PostgreSQL contract tests.
//!
//! Tests call [`maybe_temp_db`]; when `TRAP_TEST_DATABASE_URL` is unset
//! or the server is unreachable they get `None` and should return early
//! (skip, not fail), so the suite passes on machines without Postgres.
//! Each caller gets a uniquely named database with migrations applied.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use trap_db::config::DbConfig;
use trap_db::pool;

/// The env var pointing at a disposable test server.
pub const TEST_DATABASE_URL_VAR: &str = "TRAP_TEST_DATABASE_URL";

fn test_config() -> Option<DbConfig> {
    std::env::var(TEST_DATABASE_URL_VAR).ok().map(DbConfig::new)
}

/// Create a unique temporary database with migrations applied, or `None`
/// when no test server is configured or reachable.
pub async fn maybe_temp_db() -> Option<(PgPool, String)> {
    let base_config = test_config()?;
    let maint_url = base_config.maintenance_url();

    let maint_pool = match PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&maint_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("skipping: postgres test server unreachable ({e})");
            return None;
        }
    };

    let db_name = format!("trap_test_{}", Uuid::new_v4().simple());
    let stmt = format!("CREATE DATABASE {db_name}");
    if let Err(e) = maint_pool.execute(stmt.as_str()).await {
        eprintln!("skipping: could not create temp database ({e})");
        maint_pool.close().await;
        return None;
    }
    maint_pool.close().await;

    let temp_url = match base_config.database_url.rfind('/') {
        Some(pos) => format!("{}/{db_name}", &base_config.database_url[..pos]),
        None => return None,
    };

    let temp_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&temp_url)
        .await
        .ok()?;

    pool::run_migrations(&temp_pool, pool::default_migrations_path())
        .await
        .expect("migrations should apply to a fresh database");

    Some((temp_pool, db_name))
}

/// Drop a temporary database created by [`maybe_temp_db`].
pub async fn drop_temp_db(db_name: &str) {
    let Some(base_config) = test_config() else {
        return;
    };
    let maint_url = base_config.maintenance_url();

    let Ok(maint_pool) = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&maint_url)
        .await
    else {
        return;
    };

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;

    let stmt = format!("DROP DATABASE IF EXISTS {db_name}");
    let _ = maint_pool.execute(stmt.as_str()).await;
    maint_pool.close().await;
}
