use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, bail};
use clap::Parser;
use serde::Serialize;

use queuectl_core::{EnqueueRequest, JobId, JobState};
use queuectl_infra::jobs::{JobStore, ShellExecutor, SqliteJobStore, StoreError};
use queuectl_infra::shutdown::install_shutdown_handler;
use queuectl_infra::{AppPaths, ConfigStore, Worker, WorkerSettings};
use queuectl_observability::LogFormat;

mod output;

use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "A CLI based background job queue system")]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding queue.db and config.json (default: $QUEUECTL_HOME or ~/.queuectl)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log line format (logs go to stderr)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Output format
    #[arg(long, short = 'o', global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Add a new job to the queue, e.g. '{"command":"echo hello"}'
    Enqueue {
        /// Job payload: {"id"?, "command", "max_retries"?}
        job_json: String,
    },

    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Show a summary of all job states and active workers
    Status,

    /// List jobs by state
    List {
        /// pending, processing, completed or dead
        #[arg(long, default_value = "pending")]
        state: JobState,
    },

    /// Manage the Dead Letter Queue (permanently failed jobs)
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Manage system configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Start a worker in the foreground; runs until stopped
    Start,
    /// Signal all running workers to stop after their current job
    Stop,
}

#[derive(clap::Subcommand, Debug)]
enum DlqCommands {
    /// List all jobs in the DLQ, most recent failure first
    List,
    /// Move a dead job back to pending with its attempts reset
    Retry {
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Set a configuration value (max_retries, backoff_base, poll_interval_ms)
    Set { key: String, value: String },
    /// Print one configuration value
    Get { key: String },
    /// Show the current configuration
    List,
}

#[derive(Serialize)]
struct StopOutput {
    signalled: u64,
}

#[derive(Serialize)]
struct ConfigValueOutput<'a> {
    key: &'a str,
    value: u64,
}

/// Resolved locations plus output preferences shared by every command.
struct Context {
    paths: AppPaths,
    output: OutputFormat,
}

impl Context {
    fn new(home: Option<PathBuf>, output: OutputFormat) -> anyhow::Result<Self> {
        let paths = AppPaths::resolve(home)?;
        paths.ensure_exists()?;
        Ok(Self { paths, output })
    }

    fn config(&self) -> ConfigStore {
        ConfigStore::new(self.paths.config_file())
    }

    async fn store(&self) -> anyhow::Result<SqliteJobStore> {
        let path = self.paths.database();
        SqliteJobStore::open(&path)
            .await
            .with_context(|| format!("failed to open queue database at {}", path.display()))
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_enqueue(ctx: &Context, raw: &str) -> anyhow::Result<()> {
    let config = ctx.config().load();
    let new_job = EnqueueRequest::from_json(raw)?.into_new_job(&config)?;

    let store = ctx.store().await?;
    let job = store.enqueue(new_job).await;
    store.close().await;
    let job = job?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&job)?,
        OutputFormat::Table => println!("Job enqueued successfully. ID: {}", job.id),
    }
    Ok(())
}

async fn handle_worker_start(ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.config().load();
    let store = ctx.store().await?;

    let worker = Worker::new(
        store.clone(),
        ShellExecutor::default(),
        WorkerSettings::from_config(&config),
    )
    .with_shutdown(install_shutdown_handler());

    tracing::info!(
        worker_id = %worker.id(),
        db = %ctx.paths.database().display(),
        poll_interval_ms = config.poll_interval_ms,
        backoff_base = config.backoff_base,
        "starting worker"
    );

    let summary = worker.run().await;
    store.close().await;
    let summary = summary?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&summary)?,
        OutputFormat::Table => output::print_worker_summary(&summary),
    }
    Ok(())
}

async fn handle_worker_stop(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.store().await?;
    let signalled = store.stop_all_workers().await;
    store.close().await;
    let signalled = signalled?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&StopOutput { signalled })?,
        OutputFormat::Table if signalled == 0 => println!("No running workers to stop."),
        OutputFormat::Table => {
            println!("Signalled {signalled} worker(s) to stop after their current job.")
        }
    }
    Ok(())
}

async fn handle_status(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.store().await?;
    let summary = store.status_summary().await;
    store.close().await;
    let summary = summary?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&summary)?,
        OutputFormat::Table => output::print_status(&summary),
    }
    Ok(())
}

async fn handle_list(ctx: &Context, state: JobState) -> anyhow::Result<()> {
    let store = ctx.store().await?;
    let jobs = store.list_by_state(state).await;
    store.close().await;
    let jobs = jobs?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&jobs)?,
        OutputFormat::Table => output::print_jobs(state, &jobs),
    }
    Ok(())
}

async fn handle_dlq_list(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.store().await?;
    let jobs = store.list_dead_letters().await;
    store.close().await;
    let jobs = jobs?;

    match ctx.output {
        OutputFormat::Json => output::print_json(&jobs)?,
        OutputFormat::Table => output::print_dead_letters(&jobs),
    }
    Ok(())
}

async fn handle_dlq_retry(ctx: &Context, raw_id: &str) -> anyhow::Result<()> {
    let id = JobId::parse(raw_id)?;
    let store = ctx.store().await?;
    let result = store.retry_dead_letter(&id).await;
    store.close().await;

    let job = match result {
        Ok(job) => job,
        Err(StoreError::NotFound(id)) => bail!("job {id} not found in the DLQ"),
        Err(e) => return Err(e.into()),
    };

    match ctx.output {
        OutputFormat::Json => output::print_json(&job)?,
        OutputFormat::Table => println!("Job {} has been re-queued for retry.", job.id),
    }
    Ok(())
}

fn handle_config(ctx: &Context, command: ConfigCommands) -> anyhow::Result<()> {
    let config_store = ctx.config();

    match command {
        ConfigCommands::Set { key, value } => {
            let (key, config) = config_store.set(&key, &value)?;
            let value = config.get(key);
            match ctx.output {
                OutputFormat::Json => output::print_json(&ConfigValueOutput {
                    key: key.as_str(),
                    value,
                })?,
                OutputFormat::Table => println!("Config updated: {key} = {value}"),
            }
        }
        ConfigCommands::Get { key } => {
            let value = config_store.get(&key)?;
            match ctx.output {
                OutputFormat::Json => output::print_json(&ConfigValueOutput {
                    key: key.as_str(),
                    value,
                })?,
                OutputFormat::Table => println!("{value}"),
            }
        }
        ConfigCommands::List => {
            let config = config_store.load();
            match ctx.output {
                OutputFormat::Json => output::print_json(&config)?,
                OutputFormat::Table => output::print_config(&config),
            }
        }
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let ctx = Context::new(args.home, args.output)?;

    match args.command {
        Commands::Enqueue { job_json } => handle_enqueue(&ctx, &job_json).await,
        Commands::Worker { command } => match command {
            WorkerCommands::Start => handle_worker_start(&ctx).await,
            WorkerCommands::Stop => handle_worker_stop(&ctx).await,
        },
        Commands::Status => handle_status(&ctx).await,
        Commands::List { state } => handle_list(&ctx, state).await,
        Commands::Dlq { command } => match command {
            DlqCommands::List => handle_dlq_list(&ctx).await,
            DlqCommands::Retry { job_id } => handle_dlq_retry(&ctx, &job_id).await,
        },
        Commands::Config { command } => handle_config(&ctx, command),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    queuectl_observability::init(args.log_format);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn global_flags_work_after_subcommands() {
        let args = parse(&["queuectl", "status", "--output", "json", "--log-format", "json"]);
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(matches!(args.command, Commands::Status));
    }

    #[test]
    fn list_defaults_to_pending() {
        let args = parse(&["queuectl", "list"]);
        assert!(matches!(
            args.command,
            Commands::List {
                state: JobState::Pending
            }
        ));
    }

    #[test]
    fn list_rejects_unknown_states() {
        assert!(Args::try_parse_from(["queuectl", "list", "--state", "bogus"]).is_err());
    }

    #[test]
    fn enqueue_takes_raw_json() {
        let args = parse(&["queuectl", "enqueue", r#"{"command":"echo hi"}"#]);
        match args.command {
            Commands::Enqueue { job_json } => assert_eq!(job_json, r#"{"command":"echo hi"}"#),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn nested_subcommands_parse() {
        let args = parse(&["queuectl", "--home", "/tmp/q", "dlq", "retry", "job1"]);
        assert_eq!(args.home, Some(PathBuf::from("/tmp/q")));
        assert!(matches!(
            args.command,
            Commands::Dlq {
                command: DlqCommands::Retry { ref job_id }
            } if job_id == "job1"
        ));

        let args = parse(&["queuectl", "config", "set", "max_retries", "5"]);
        assert!(matches!(
            args.command,
            Commands::Config {
                command: ConfigCommands::Set { .. }
            }
        ));
    }
}
