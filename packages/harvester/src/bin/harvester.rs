//! Operator CLI over the persisted job table.
//!
//! Prints JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvester::queries::{self, JobSummary};
use harvester::{AppConfig, JobId, JobStore, SqliteJobStore};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "harvester")]
#[command(about = "Inspect and clean up extraction jobs")]
struct Cli {
    /// Overrides HARVEST_DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every persisted job, oldest first
    List,

    /// Show the job an observer would attach to
    Active,

    /// Show one job including its records
    Show { id: JobId },

    /// Remove finished jobs that no longer hold a surface
    Purge {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<Vec<JobSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purged: Option<Vec<JobId>>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            jobs: None,
            job: None,
            purged: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn output(resp: Response) -> Result<()> {
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let database_url = cli.database_url.unwrap_or(config.database_url);

    let store = SqliteJobStore::new(&database_url)
        .await
        .with_context(|| format!("Failed to open job store at {}", database_url))?;

    let result = match cli.command {
        Commands::List => cmd_list(&store).await,
        Commands::Active => cmd_active(&store).await,
        Commands::Show { id } => cmd_show(&store, id).await,
        Commands::Purge { dry_run } => cmd_purge(&store, dry_run).await,
    };

    store.close().await;
    result
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_list(store: &SqliteJobStore) -> Result<()> {
    let jobs = queries::summaries(store).await?;
    output(Response {
        jobs: Some(jobs),
        ..Response::ok()
    })
}

async fn cmd_active(store: &SqliteJobStore) -> Result<()> {
    match queries::find_most_recent_active(store).await? {
        Some(job) => output(Response {
            jobs: Some(vec![JobSummary::from(&job)]),
            ..Response::ok()
        }),
        None => output(Response::ok().with_message("No running or sending job")),
    }
}

async fn cmd_show(store: &SqliteJobStore, id: JobId) -> Result<()> {
    match store.get(id).await? {
        Some(job) => output(Response {
            job: Some(serde_json::to_value(&job)?),
            ..Response::ok()
        }),
        None => output(Response {
            success: false,
            ..Response::ok().with_message(format!("Job '{}' not found", id))
        }),
    }
}

async fn cmd_purge(store: &SqliteJobStore, dry_run: bool) -> Result<()> {
    if dry_run {
        let would_purge: Vec<JobId> = store
            .list()
            .await?
            .into_iter()
            .filter(|job| job.status.is_terminal() && job.surface.is_none())
            .map(|job| job.id)
            .collect();
        return output(Response {
            purged: Some(would_purge),
            ..Response::ok().with_message("Dry run, nothing removed")
        });
    }

    let purged = queries::purge_terminal(store).await?;
    tracing::info!(count = purged.len(), "Purged finished jobs");
    output(Response {
        purged: Some(purged),
        ..Response::ok()
    })
}
