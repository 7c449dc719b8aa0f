//! `trap gate <slug>`: print one project's attention gate as JSON.
//!
//! This is the per-project gate script the registered cron jobs invoke.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::PgPool;

use trap_core::config::WorkLoopConfig;
use trap_core::gate;
use trap_db::pg::PgStore;
use trap_db::store::Store;

pub async fn run_gate(db_pool: PgPool, slug: &str) -> Result<()> {
    let config = WorkLoopConfig::default();
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    let Some(project) = store.get_project_by_slug(slug).await? else {
        bail!("no project with slug {slug:?}");
    };

    let view = gate::evaluate(store.as_ref(), project.id, Utc::now(), config.stuck_after)
        .await
        .context("gate evaluation failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&view).context("failed to serialize gate view")?
    );
    Ok(())
}
