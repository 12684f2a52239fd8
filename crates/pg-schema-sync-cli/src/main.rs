//! pg-schema-sync CLI - schema diff and checkpointed data sync for PostgreSQL.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use async_trait::async_trait;
use chrono::Utc;
use pg_schema_sync::job::Progress;
use pg_schema_sync::{
    generate_migration, validate, Config, Db, FileCheckpointStore, Inspector, JobRunner,
    JobStatus, MigrationDirection, PgTableReader, PgTableWriter, ScheduledJob, Scheduler,
    SyncExecutor, SyncJob, SyncObserver, SyncOptions, SyncReport, TableSyncConfig,
    ValidateOptions,
};

#[derive(Parser)]
#[command(name = "pg-schema-sync")]
#[command(about = "Schema inspection, diff, migration generation and checkpointed sync for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "sync.yaml")]
    config: PathBuf,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect both databases and print their schemas
    Inspect,

    /// Validate the source schema against the target
    Validate,

    /// Generate a migration plan from the schema diff
    Migrate {
        /// Write the auto-runnable forward script to this path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run a sync job, resuming from a stored checkpoint when present
    Sync {
        /// Directory for checkpoint files
        #[arg(long, default_value = ".pg-schema-sync")]
        state_dir: PathBuf,

        /// Job id to resume (a new id is generated when omitted)
        #[arg(long)]
        job_id: Option<Uuid>,

        /// Acknowledge a validation that requires confirmation
        #[arg(long)]
        confirm: bool,
    },

    /// Re-run the sync on a cron cadence until interrupted
    Schedule {
        /// Five-field cron expression, evaluated in UTC
        cron: String,

        /// Directory for checkpoint files
        #[arg(long, default_value = ".pg-schema-sync")]
        state_dir: PathBuf,

        /// Acknowledge a validation that requires confirmation
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let source = Db::connect(&config.source.url, config.source.max_connections)
        .await
        .context("connecting to source")?;
    let target = Db::connect(&config.target.url, config.target.max_connections)
        .await
        .context("connecting to target")?;

    let inspector = Inspector::new();

    match cli.command {
        Commands::Inspect => {
            let source_schema = inspector.inspect(&source).await?;
            let target_schema = inspector.inspect(&target).await?;

            if cli.json {
                let out = serde_json::json!({
                    "source": source_schema,
                    "target": target_schema,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (label, schema) in [("source", &source_schema), ("target", &target_schema)] {
                    println!(
                        "{}: PostgreSQL {}, {} tables ({} syncable), {} enum types",
                        label,
                        schema.server_version,
                        schema.tables.len(),
                        schema.syncable_tables.len(),
                        schema.enums.len()
                    );
                    for table in &schema.tables {
                        let marker = if table.is_syncable() { "+" } else { "-" };
                        println!(
                            "  {} {} ({} columns, ~{} rows)",
                            marker,
                            table.name,
                            table.columns.len(),
                            table.row_estimate
                        );
                    }
                }
            }
        }

        Commands::Validate => {
            let result = validate_pair(&inspector, &source, &target, &config).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for warning in &result.warnings {
                    println!("warning: {}", warning);
                }
                for issue in &result.issues {
                    let column = issue
                        .column
                        .as_deref()
                        .map(|c| format!(".{}", c))
                        .unwrap_or_default();
                    println!(
                        "[{:?}] {}{}: {} ({})",
                        issue.severity, issue.table, column, issue.message, issue.recommendation
                    );
                }
                println!(
                    "{} issues: can proceed: {}, requires confirmation: {}",
                    result.issues.len(),
                    result.can_proceed,
                    result.requires_confirmation
                );
            }
        }

        Commands::Migrate { out } => {
            let source_schema = inspector.inspect(&source).await?;
            let target_schema = inspector.inspect(&target).await?;
            let plan = generate_migration(
                &source_schema,
                &target_schema,
                MigrationDirection::SourceToTarget,
            )?;

            if let Some(path) = &out {
                std::fs::write(path, &plan.combined_script)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Wrote forward script to {}", path.display());
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!(
                    "{} scripts ({} need manual review)",
                    plan.scripts.len(),
                    plan.manual_scripts.len()
                );
                if !plan.combined_script.is_empty() {
                    println!("\n-- auto-runnable --\n{}", plan.combined_script);
                }
                for script in &plan.manual_scripts {
                    println!(
                        "\n-- MANUAL REVIEW ({:?} risk{}): {}\n{}",
                        script.risk,
                        if script.destructive { ", destructive" } else { "" },
                        script.description,
                        script.sql
                    );
                }
                if !plan.rollback_script.is_empty() {
                    println!("\n-- rollback --\n{}", plan.rollback_script);
                }
            }
        }

        Commands::Sync {
            state_dir,
            job_id,
            confirm,
        } => {
            gate_on_validation(&inspector, &source, &target, &config, confirm).await?;

            let Some(mut job) = build_job(&inspector, &source, &target, &config).await? else {
                return Ok(());
            };
            if let Some(id) = job_id {
                job.id = id;
            }

            let executor = build_executor(&source, &target, state_dir);
            let options = sync_options(&config);
            let cancel = cancel_on_interrupt();

            let report = executor
                .run(&job, &options, &ProgressLogger, &cancel)
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Sync {:?}: {}/{} tables, {} rows in {:.1}s ({} rows/s)",
                    report.status,
                    report.progress.tables_done,
                    report.progress.tables_total,
                    report.progress.processed_rows,
                    report.duration_seconds,
                    report.rows_per_second
                );
                for error in &report.errors {
                    println!("  error: {}", error);
                }
                if report.status == JobStatus::Paused {
                    println!(
                        "Paused. Resume with: pg-schema-sync sync --job-id {}",
                        job.id
                    );
                }
            }

            if report.status == JobStatus::Failed {
                anyhow::bail!("sync finished with {} error(s)", report.errors.len());
            }
        }

        Commands::Schedule {
            cron,
            state_dir,
            confirm,
        } => {
            gate_on_validation(&inspector, &source, &target, &config, confirm).await?;

            let Some(job) = build_job(&inspector, &source, &target, &config).await? else {
                return Ok(());
            };

            let executor = build_executor(&source, &target, state_dir);
            let cancel = cancel_on_interrupt();

            let runner = Arc::new(ExecutorRunner {
                executor,
                options: sync_options(&config),
                cancel: cancel.clone(),
            });

            let scheduler = Scheduler::new(runner);
            let scheduled = ScheduledJob::new(job, cron)?;
            let id = scheduler.add(scheduled).await;
            scheduler.enable(id, Utc::now()).await?;

            if let Some(job) = scheduler.get(id).await {
                info!("Schedule armed; next run at {:?}", job.next_run);
            }

            scheduler.run_until_cancelled(cancel).await;
            info!("Scheduler stopped");
        }
    }

    Ok(())
}

/// Refuse to sync past a validation that blocks or needs confirmation.
async fn gate_on_validation(
    inspector: &Inspector,
    source: &Db,
    target: &Db,
    config: &Config,
    confirm: bool,
) -> anyhow::Result<()> {
    let validation = validate_pair(inspector, source, target, config).await?;
    if !validation.can_proceed {
        anyhow::bail!(
            "validation found {} critical issue(s); run `validate` for details",
            validation.critical_count
        );
    }
    if validation.requires_confirmation && !confirm {
        anyhow::bail!(
            "validation requires confirmation (production target or HIGH issues); re-run with --confirm"
        );
    }
    Ok(())
}

/// Build the sync job from config, or auto-discovered syncable tables.
/// Returns `None` when there is nothing to sync.
async fn build_job(
    inspector: &Inspector,
    source: &Db,
    target: &Db,
    config: &Config,
) -> anyhow::Result<Option<SyncJob>> {
    let tables = if config.tables.is_empty() {
        discover_tables(inspector, source, target).await?
    } else {
        config.tables.clone()
    };
    if tables.is_empty() {
        warn!("No syncable tables; nothing to do");
        return Ok(None);
    }

    Ok(Some(SyncJob::new(
        config.source.url.clone(),
        config.target.url.clone(),
        config.direction,
        tables,
    )))
}

fn build_executor(source: &Db, target: &Db, state_dir: PathBuf) -> SyncExecutor {
    SyncExecutor::new(
        Arc::new(PgTableReader::new(source.clone())),
        Arc::new(PgTableWriter::new(target.clone())),
        Arc::new(FileCheckpointStore::new(state_dir)),
    )
}

fn sync_options(config: &Config) -> SyncOptions {
    SyncOptions {
        batch_size: config.sync.batch_size,
        max_tables: config.sync.max_tables_per_job,
    }
}

/// Cancellation token wired to SIGINT; syncs pause after the current batch.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; pausing after the current batch");
            signal_token.cancel();
        }
    });
    cancel
}

/// Runs scheduled triggers through the sync executor.
struct ExecutorRunner {
    executor: SyncExecutor,
    options: SyncOptions,
    cancel: CancellationToken,
}

#[async_trait]
impl JobRunner for ExecutorRunner {
    async fn run(&self, job: &SyncJob) -> pg_schema_sync::Result<SyncReport> {
        self.executor
            .run(job, &self.options, &ProgressLogger, &self.cancel)
            .await
    }
}

async fn validate_pair(
    inspector: &Inspector,
    source: &Db,
    target: &Db,
    config: &Config,
) -> anyhow::Result<pg_schema_sync::ValidationResult> {
    let source_schema = inspector.inspect(source).await?;
    let target_schema = inspector.inspect(target).await?;
    let tables: Vec<String> = config.tables.iter().map(|t| t.table.clone()).collect();
    Ok(validate(
        &source_schema,
        &target_schema,
        &tables,
        &ValidateOptions {
            production_target: config.production_target,
        },
    ))
}

/// Tables syncable on both sides, for auto-discovery mode.
async fn discover_tables(
    inspector: &Inspector,
    source: &Db,
    target: &Db,
) -> anyhow::Result<Vec<TableSyncConfig>> {
    let source_schema = inspector.inspect(source).await?;
    let target_schema = inspector.inspect(target).await?;

    Ok(source_schema
        .tables
        .iter()
        .filter(|t| t.is_syncable())
        .filter(|t| {
            target_schema
                .table(&t.name)
                .map(|tt| tt.is_syncable())
                .unwrap_or(false)
        })
        .map(|t| TableSyncConfig::new(&t.name))
        .collect())
}

/// Logs progress after every batch.
struct ProgressLogger;

impl SyncObserver for ProgressLogger {
    fn on_progress(&self, progress: &Progress) {
        info!(
            "{}: {} rows processed ({} inserted, {} updated, {} skipped)",
            progress.current_table.as_deref().unwrap_or("?"),
            progress.processed_rows,
            progress.inserted_rows,
            progress.updated_rows,
            progress.skipped_rows
        );
    }

    fn on_table_started(&self, table: &str) {
        info!("Starting table {}", table);
    }
}
