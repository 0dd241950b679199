//! CLI command definitions for enrich-forge.
//!
//! The binary administers jobs stored in a SQLite state database. Running
//! an enrichment needs capability implementations, so that part lives in
//! embedding applications (see [`crate::orchestrator::EnrichmentBuilder`]).

use crate::error::StateError;
use crate::models::RowStage;
use crate::state::{RowUpdate, SqliteStore, StateManager};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Default SQLite database path.
const DEFAULT_DATABASE: &str = "./enrich-forge.db";

/// Job administration for the enrich-forge row enrichment engine.
#[derive(Parser)]
#[command(name = "enrich-forge")]
#[command(about = "Manage row enrichment jobs")]
#[command(version)]
#[command(
    long_about = "enrich-forge tracks row enrichment jobs in a SQLite state database.\n\nExample usage:\n  enrich-forge jobs create --rows 250 --start\n  enrich-forge jobs progress <job-id>"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Path to the SQLite state database.
    #[arg(
        short,
        long,
        env = "ENRICH_DATABASE_URL",
        default_value = DEFAULT_DATABASE,
        global = true
    )]
    pub database: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create, inspect and control enrichment jobs.
    Jobs(JobsArgs),
}

/// `jobs` entrypoint arguments.
#[derive(Parser, Debug)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsSubcommand,
}

/// Job subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum JobsSubcommand {
    /// Create a job record for a number of rows.
    Create(CreateArgs),

    /// Mark a job as running.
    Start(JobIdArgs),

    /// Show row counts per stage.
    Progress(JobIdArgs),

    /// Cancel a job. In-flight rows are marked CANCELLED.
    Cancel(JobIdArgs),

    /// Pause a job.
    Pause(JobIdArgs),

    /// Resume a paused job.
    Resume(JobIdArgs),

    /// Print the results of completed rows.
    Results(ResultsArgs),
}

/// Arguments for `enrich-forge jobs create`.
#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// Number of rows the job will enrich. Row keys are supplied by the
    /// application that runs the job.
    #[arg(short, long)]
    pub rows: usize,

    /// Mark the job as running right away.
    #[arg(long)]
    pub start: bool,
}

/// A single job id.
#[derive(Parser, Debug)]
pub struct JobIdArgs {
    /// Job identifier.
    pub job_id: String,
}

/// Arguments for `enrich-forge jobs results`.
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Job identifier.
    pub job_id: String,

    /// Number of results to skip.
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Maximum number of results to print.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let store = SqliteStore::open(&cli.database).await?;
    let state = Arc::new(StateManager::new(Arc::new(store)));

    match cli.command {
        Commands::Jobs(args) => run_jobs_command(&state, args).await,
    }
}

// ============================================================================
// Job Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateOutput {
    job_id: String,
    total_rows: usize,
    started: bool,
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    job_id: &'a str,
    action: &'a str,
}

async fn run_jobs_command(state: &StateManager, args: JobsArgs) -> anyhow::Result<()> {
    match args.command {
        JobsSubcommand::Create(args) => print_json(&run_create_command(state, args).await?),
        JobsSubcommand::Start(args) => {
            let progress = state.progress(&args.job_id).await?;
            state.start_job(&args.job_id, progress.total_rows).await?;
            print_json(&StatusOutput {
                job_id: &args.job_id,
                action: "started",
            })
        }
        JobsSubcommand::Progress(args) => {
            let progress = state.progress(&args.job_id).await?;
            info!(
                job_id = %progress.job_id,
                finished = progress.finished_rows(),
                total = progress.total_rows,
                "Job progress"
            );
            print_json(&progress)
        }
        JobsSubcommand::Cancel(args) => {
            state.cancel(&args.job_id).await?;
            cancel_pending_rows(state, &args.job_id).await?;
            print_json(&StatusOutput {
                job_id: &args.job_id,
                action: "cancelled",
            })
        }
        JobsSubcommand::Pause(args) => {
            state.pause(&args.job_id).await?;
            print_json(&StatusOutput {
                job_id: &args.job_id,
                action: "paused",
            })
        }
        JobsSubcommand::Resume(args) => {
            state.resume(&args.job_id).await?;
            print_json(&StatusOutput {
                job_id: &args.job_id,
                action: "resumed",
            })
        }
        JobsSubcommand::Results(args) => {
            let results = state
                .results(&args.job_id, args.offset, args.limit)
                .await?;
            print_json(&results)
        }
    }
}

async fn run_create_command(state: &StateManager, args: CreateArgs) -> anyhow::Result<CreateOutput> {
    if args.rows == 0 {
        return Err(anyhow::anyhow!("A job needs at least one row"));
    }

    let job = state.create_job(args.rows).await?;
    if args.start {
        state.start_job(&job.id, args.rows).await?;
    }
    info!(job_id = %job.id, rows = args.rows, started = args.start, "Job created");

    Ok(CreateOutput {
        job_id: job.id,
        total_rows: args.rows,
        started: args.start,
    })
}

/// Rows that never left PENDING are not picked up by any worker, so the
/// CLI marks them CANCELLED itself. On a cancelled job every transition
/// does exactly that and reports `JobCancelled`.
async fn cancel_pending_rows(state: &StateManager, job_id: &str) -> anyhow::Result<()> {
    let pending = state
        .rows_at_stage(job_id, RowStage::Pending, 0, None)
        .await?;
    for row in &pending {
        match state
            .transition(job_id, &row.key, RowStage::Cancelled, RowUpdate::new())
            .await
        {
            Ok(_) | Err(StateError::JobCancelled(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if !pending.is_empty() {
        info!(job_id = %job_id, rows = pending.len(), "Pending rows cancelled");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::state::InMemoryStore;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_create_command_defaults() {
        let cli = Cli::try_parse_from(["enrich-forge", "jobs", "create", "--rows", "250"])
            .expect("should parse");
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Jobs(JobsArgs {
                command: JobsSubcommand::Create(args),
            }) => {
                assert_eq!(args.rows, 250);
                assert!(!args.start);
            }
            _ => panic!("Expected jobs create"),
        }
    }

    #[test]
    fn test_results_command_paging() {
        let cli = Cli::try_parse_from([
            "enrich-forge",
            "--database",
            "/tmp/x.db",
            "jobs",
            "results",
            "job-1",
            "--offset",
            "10",
            "--limit",
            "5",
        ])
        .expect("should parse");
        assert_eq!(cli.database, "/tmp/x.db");
        match cli.command {
            Commands::Jobs(JobsArgs {
                command: JobsSubcommand::Results(args),
            }) => {
                assert_eq!(args.job_id, "job-1");
                assert_eq!(args.offset, 10);
                assert_eq!(args.limit, Some(5));
            }
            _ => panic!("Expected jobs results"),
        }
    }

    #[tokio::test]
    async fn test_create_command_records_row_count() {
        let state = StateManager::new(Arc::new(InMemoryStore::new()));
        let created = run_create_command(&state, CreateArgs { rows: 3, start: true })
            .await
            .expect("create");
        assert_eq!(created.total_rows, 3);
        assert!(created.started);

        let progress = state.progress(&created.job_id).await.unwrap();
        assert_eq!(progress.total_rows, 3);
        assert_eq!(progress.status, JobStatus::Running);

        let err = run_create_command(&state, CreateArgs { rows: 0, start: false })
            .await
            .expect_err("empty job");
        assert!(err.to_string().contains("at least one row"));
    }

    #[tokio::test]
    async fn test_create_and_cancel_marks_pending_rows() {
        let state = StateManager::new(Arc::new(InMemoryStore::new()));
        let created = run_create_command(&state, CreateArgs { rows: 2, start: true })
            .await
            .expect("create");
        let keys = vec!["acme".to_string(), "globex".to_string()];
        // Rows are registered by the application running the job.
        state.initialize_job(&created.job_id, &keys).await.unwrap();
        let job_id = created.job_id;

        run_jobs_command(
            &state,
            JobsArgs {
                command: JobsSubcommand::Cancel(JobIdArgs {
                    job_id: job_id.clone(),
                }),
            },
        )
        .await
        .expect("cancel");

        let progress = state.progress(&job_id).await.unwrap();
        assert_eq!(progress.status, JobStatus::Cancelled);
        assert_eq!(progress.rows_by_stage.get(&RowStage::Cancelled), Some(&2));
    }
}
