//! `trap triage ...`: operator entry points to the triage machine.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use trap_core::triage::{self, SubtaskSpec};
use trap_db::models::{Priority, Role};
use trap_db::pg::PgStore;
use trap_db::store::Store;

use crate::TriageCommands;
use crate::parse_task_id;

const ACTOR: &str = "operator";

pub async fn run_triage(db_pool: PgPool, command: TriageCommands) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    match command {
        TriageCommands::Unblock { task_id } => {
            let id = parse_task_id(&task_id)?;
            triage::unblock(store.as_ref(), id, ACTOR).await?;
            println!("Task {task_id} unblocked; back to ready.");
        }
        TriageCommands::Reassign {
            task_id,
            role,
            model,
        } => {
            let id = parse_task_id(&task_id)?;
            let role = role
                .as_deref()
                .map(|r| r.parse::<Role>().context("invalid role"))
                .transpose()?;
            triage::reassign(store.as_ref(), id, role, model.as_deref(), ACTOR).await?;
            println!("Task {task_id} reassigned; back to ready.");
        }
        TriageCommands::Split { task_id, subtasks } => {
            let id = parse_task_id(&task_id)?;
            let specs: Vec<SubtaskSpec> = subtasks
                .into_iter()
                .map(|title| SubtaskSpec {
                    title,
                    description: None,
                    priority: Priority::Medium,
                    role: None,
                })
                .collect();
            let created = triage::split(store.as_ref(), id, specs, ACTOR).await?;
            println!("Task {task_id} split into {} subtask(s):", created.len());
            for subtask_id in created {
                println!("  {subtask_id}");
            }
        }
        TriageCommands::Kill { task_id, reason } => {
            let id = parse_task_id(&task_id)?;
            triage::kill(store.as_ref(), id, &reason, ACTOR).await?;
            println!("Task {task_id} sent back to backlog.");
        }
        TriageCommands::Escalate { task_id, reason } => {
            let id = parse_task_id(&task_id)?;
            triage::escalate(store.as_ref(), id, reason.as_deref(), ACTOR).await?;
            println!("Task {task_id} escalated.");
        }
    }

    Ok(())
}
