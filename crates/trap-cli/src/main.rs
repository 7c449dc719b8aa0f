mod config;
mod crons_cmd;
mod gate_cmd;
mod run_cmd;
mod status_cmd;
mod triage_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};

use trap_db::pool;

use config::TrapConfig;

#[derive(Parser)]
#[command(name = "trap", about = "Multi-project work-loop supervisor for AI coding agents")]
struct Cli {
    /// Database URL (overrides TRAP_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a trap config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/trap")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the trap database (create + migrate)
    DbInit,
    /// Run the work-loop supervisor until interrupted
    Run,
    /// Register per-project work-loop cron jobs in the agent gateway
    SetupCrons,
    /// Print the attention gate for one project as JSON
    Gate {
        /// Project slug
        slug: String,
    },
    /// Show project and agent-session status
    Status {
        /// Project slug (omit to show all enabled projects)
        slug: Option<String>,
    },
    /// Resolve a blocked task
    Triage {
        #[command(subcommand)]
        command: TriageCommands,
    },
}

#[derive(Subcommand)]
pub enum TriageCommands {
    /// Move a blocked task back to ready
    Unblock {
        /// Task ID
        task_id: String,
    },
    /// Move a blocked task back to ready with a new role and/or model
    Reassign {
        /// Task ID
        task_id: String,
        /// New role: pm, dev, research, reviewer, conflict_resolver
        #[arg(long)]
        role: Option<String>,
        /// Model override for the next agent
        #[arg(long)]
        model: Option<String>,
    },
    /// Replace a blocked task with backlog subtasks
    Split {
        /// Task ID
        task_id: String,
        /// Subtask title (repeat for several)
        #[arg(long = "subtask", required = true)]
        subtasks: Vec<String>,
    },
    /// Send a blocked task back to the backlog
    Kill {
        /// Task ID
        task_id: String,
        /// Why the task is being shelved
        reason: String,
    },
    /// Escalate a blocked task to the coordinator
    Escalate {
        /// Task ID
        task_id: String,
        /// Optional escalation reason
        reason: Option<String>,
    },
}

/// Execute `trap init`: write the config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        gateway: config::GatewaySection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `trap db-init` to create and migrate the database.");

    Ok(())
}

/// Execute `trap db-init`: create the database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = TrapConfig::resolve(cli_db_url)?;

    println!("Initializing trap database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("trap db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Run => {
            let resolved = TrapConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_cmd::run_loop(db_pool.clone(), &resolved.gateway_config).await;
            db_pool.close().await;
            result?;
        }
        Commands::SetupCrons => {
            let resolved = TrapConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = crons_cmd::run_setup_crons(db_pool.clone(), &resolved.gateway_config).await;
            db_pool.close().await;
            // Exit 1 on any API or RPC error.
            result?;
        }
        Commands::Gate { slug } => {
            let resolved = TrapConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = gate_cmd::run_gate(db_pool.clone(), &slug).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { slug } => {
            let resolved = TrapConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                status_cmd::run_status(db_pool.clone(), &resolved.gateway_config, slug.as_deref())
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Triage { command } => {
            let resolved = TrapConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = triage_cmd::run_triage(db_pool.clone(), command).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

/// Parse a task id argument.
pub(crate) fn parse_task_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).with_context(|| format!("invalid task ID: {raw}"))
}
