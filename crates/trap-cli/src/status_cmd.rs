//! `trap status [slug]`: task counts per project plus live work-loop
//! session previews from the gateway.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use trap_core::config::{GatewayConfig, WorkLoopConfig};
use trap_core::rpc::{Gateway, OpenclawRpc};
use trap_db::models::{Project, TaskStatus};
use trap_db::pg::PgStore;
use trap_db::store::Store;

const STATUSES: [TaskStatus; 6] = [
    TaskStatus::Backlog,
    TaskStatus::Ready,
    TaskStatus::InProgress,
    TaskStatus::InReview,
    TaskStatus::Blocked,
    TaskStatus::Done,
];

pub async fn run_status(
    db_pool: PgPool,
    gateway_config: &GatewayConfig,
    slug: Option<&str>,
) -> Result<()> {
    let config = WorkLoopConfig::default();
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    let projects: Vec<Project> = match slug {
        Some(slug) => match store.get_project_by_slug(slug).await? {
            Some(project) => vec![project],
            None => bail!("no project with slug {slug:?}"),
        },
        None => store.list_enabled_projects().await?,
    };

    if projects.is_empty() {
        println!("No enabled projects.");
        return Ok(());
    }

    for project in &projects {
        println!("{} ({})", project.name, project.slug);
        for status in STATUSES {
            let count = store.list_tasks(project.id, status).await?.len();
            if count > 0 {
                println!("  {status:<12} {count}");
            }
        }
    }

    print_session_previews(gateway_config, &config).await;
    Ok(())
}

/// Best effort: an unreachable gateway degrades to a notice, not an
/// error, so `status` stays useful offline.
async fn print_session_previews(gateway_config: &GatewayConfig, config: &WorkLoopConfig) {
    let gateway = match OpenclawRpc::new(gateway_config, config.rpc_timeout)
        .context("failed to build gateway client")
    {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("(gateway client unavailable: {e})");
            return;
        }
    };

    let sessions = match gateway.sessions_list(Some(50)).await {
        Ok(sessions) => sessions,
        Err(e) => {
            eprintln!("(gateway unreachable: {e})");
            return;
        }
    };

    let keys: Vec<String> = sessions
        .iter()
        .filter(|s| s.key.starts_with("workloop:"))
        .map(|s| s.key.clone())
        .collect();
    if keys.is_empty() {
        println!("\nNo live work-loop sessions.");
        return;
    }

    println!("\nLive work-loop sessions:");
    match gateway.sessions_preview(&keys, 1).await {
        Ok(previews) => {
            for preview in previews {
                let last = preview
                    .items
                    .last()
                    .map(|item| truncate(&item.text, 80))
                    .unwrap_or_default();
                println!("  {} [{}] {}", preview.key, preview.status, last);
            }
        }
        Err(e) => {
            for key in keys {
                println!("  {key}");
            }
            eprintln!("(session preview failed: {e})");
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let flattened = s.replace('\n', " ");
    match flattened.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flattened[..idx]),
        None => flattened,
    }
}
