//! `trap run`: assemble the supervisor and run the scheduler until
//! SIGINT.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use trap_core::agents::AgentManager;
use trap_core::browser::BrowserControl;
use trap_core::config::{GatewayConfig, WorkLoopConfig};
use trap_core::cycle::scheduler::Scheduler;
use trap_core::cycle::{CycleDriver, CycleEnv};
use trap_core::github::GhCli;
use trap_core::process::ProcessRunner;
use trap_core::rpc::{Gateway, OpenclawRpc};
use trap_core::worktree::WorktreeSweeper;
use trap_db::pg::PgStore;
use trap_db::store::Store;

pub async fn run_loop(db_pool: PgPool, gateway_config: &GatewayConfig) -> Result<()> {
    let config = WorkLoopConfig::default();

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let gateway: Arc<dyn Gateway> = Arc::new(
        OpenclawRpc::new(gateway_config, config.rpc_timeout)
            .context("failed to build gateway client")?,
    );
    let agents = Arc::new(AgentManager::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
        config.reap_cooldown,
    ));
    let runner = Arc::new(ProcessRunner::new());
    let github = Arc::new(GhCli::new(Arc::clone(&runner), config.subprocess_timeout));
    let worktrees = Arc::new(WorktreeSweeper::new(
        Arc::clone(&runner),
        config.subprocess_timeout,
        config.worktree_remove_timeout,
    ));
    let browser = match std::env::var("TRAP_BROWSER_URL") {
        Ok(url) => Some(Arc::new(
            BrowserControl::new(url, config.rpc_timeout)
                .context("failed to build browser-control client")?,
        )),
        Err(_) => None,
    };

    let driver = Arc::new(CycleDriver::new(CycleEnv {
        store,
        agents,
        github,
        worktrees,
        browser,
        config,
    }));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    Scheduler::new(driver, cancel).run().await
}
