use std::collections::HashSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::{Row, SqlitePool};
use tokio::sync::watch;
use uuid::Uuid;

use supplier_risk::audit::AuditLogger;
use supplier_risk::config::{database_url, load_env};
use supplier_risk::db;
use supplier_risk::queue::{JobQueue, QueueConfig, SqliteJobQueue};
use supplier_risk::worker::{MockScoringEngine, RiskWorker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "supplier-risk operations tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Run the risk-analysis worker without the HTTP service
    Worker {
        /// Process what is available now, then exit
        #[arg(long)]
        drain: bool,
    },
    /// Delete finished jobs past their retention window
    PurgeJobs,
    /// Print job counts per state
    QueueStats,
    /// Check the audit hash chain of one organization, or of all of them
    VerifyAudit {
        #[arg(long)]
        organization: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Worker { drain } => {
            let pool = get_pool().await?;
            run_worker(pool, drain).await?;
        }
        Commands::PurgeJobs => {
            let queue = open_queue(get_pool().await?).await?;
            let purged = queue.purge_expired().await?;
            println!("Purged {purged} finished jobs");
        }
        Commands::QueueStats => {
            let queue = open_queue(get_pool().await?).await?;
            let stats = queue.stats().await?;
            println!("{:<10} {}", "waiting", stats.waiting);
            println!("{:<10} {}", "delayed", stats.delayed);
            println!("{:<10} {}", "active", stats.active);
            println!("{:<10} {}", "completed", stats.completed);
            println!("{:<10} {}", "failed", stats.failed);
        }
        Commands::VerifyAudit { organization } => {
            let logger = AuditLogger::new(get_pool().await?);
            let organizations = match organization {
                Some(id) => vec![id],
                None => logger.organizations().await?,
            };

            let mut intact = true;
            for organization_id in organizations {
                let report = logger.verify_chain(organization_id).await?;
                match report.broken_at {
                    None => println!("ok      {} ({} entries)", organization_id, report.checked),
                    Some(seq) => {
                        intact = false;
                        println!("BROKEN  {} at seq {} ({} entries checked)", organization_id, seq, report.checked);
                    }
                }
            }

            if !intact {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    db::connect(&database_url()?).await
}

async fn open_queue(pool: SqlitePool) -> anyhow::Result<SqliteJobQueue> {
    Ok(SqliteJobQueue::open(pool, QueueConfig::from_env()?).await?)
}

async fn run_worker(pool: SqlitePool, drain: bool) -> anyhow::Result<()> {
    let queue: Arc<dyn JobQueue> = Arc::new(open_queue(pool.clone()).await?);
    let worker = Arc::new(RiskWorker::new(
        pool,
        Arc::clone(&queue),
        Arc::new(MockScoringEngine::from_env()?),
        WorkerConfig::from_env()?,
    )?);

    if drain {
        let attempts = worker.drain().await?;
        println!("Processed {attempts} job attempts");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    queue.close().await;
    let _ = shutdown_tx.send(true);
    handle.await.context("worker task failed")?;
    Ok(())
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;

    let applied_versions: HashSet<i64> = if table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, else the crate's own folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
