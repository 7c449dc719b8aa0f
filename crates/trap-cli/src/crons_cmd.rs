//! `trap setup-crons`: register one gateway cron job per enabled
//! project.
//!
//! Each job is named `trap-work-loop-<slug>`, fires on the project's
//! `work_loop_schedule`, and runs the per-project gate script
//! (`trap gate <slug>`). Only projects with both a local checkout and a
//! GitHub repo qualify. Any store or RPC error propagates, so the
//! process exits 1.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use trap_core::config::{GatewayConfig, WorkLoopConfig};
use trap_core::rpc::{CronJob, Gateway, OpenclawRpc};
use trap_db::pg::PgStore;
use trap_db::store::Store;

pub async fn run_setup_crons(db_pool: PgPool, gateway_config: &GatewayConfig) -> Result<()> {
    let config = WorkLoopConfig::default();
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let gateway = OpenclawRpc::new(gateway_config, config.rpc_timeout)
        .context("failed to build gateway client")?;

    let projects = store
        .list_enabled_projects()
        .await
        .context("failed to list enabled projects")?;

    let mut registered = 0usize;
    for project in projects {
        if project.local_path.is_none() || project.github_repo.is_none() {
            tracing::debug!(slug = %project.slug, "skipping project without checkout + repo");
            continue;
        }

        let env = config.api_url.as_ref().map(|url| {
            let mut map = serde_json::Map::new();
            map.insert("TRAP_URL".to_owned(), serde_json::Value::String(url.clone()));
            map
        });

        let job = CronJob {
            id: format!("trap-work-loop-{}", project.slug),
            schedule: project.work_loop_schedule.clone(),
            command: format!("trap gate {}", project.slug),
            env,
        };

        gateway
            .cron_add(&job)
            .await
            .with_context(|| format!("failed to register cron job {}", job.id))?;
        println!("registered {} ({})", job.id, job.schedule);
        registered += 1;
    }

    println!("Registered {registered} work-loop cron job(s).");
    Ok(())
}
