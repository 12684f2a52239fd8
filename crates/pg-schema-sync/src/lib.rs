//! # pg-schema-sync
//!
//! Schema inspection, diff, migration generation, and checkpointed data
//! sync between two PostgreSQL databases.
//!
//! The engine exposes four operations:
//!
//! - **Inspect**: read a database's catalog into an immutable schema model
//! - **Validate**: compare two schemas into severity-tagged issues and a
//!   proceed/confirm decision
//! - **Generate migration**: derive idempotent DDL from the diff, with
//!   destructive statements segregated for manual review
//! - **Run sync**: move rows in checkpointed UPSERT batches, resumable
//!   from the last persisted checkpoint, with per-row conflict resolution
//!   in two-way mode
//!
//! A cron scheduler re-invokes sync jobs on a cadence via a single
//! periodic scan.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_sync::{Db, Inspector, validate, ValidateOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_schema_sync::SyncError> {
//!     let source = Db::connect("postgres://app@source-host/app", 4).await?;
//!     let target = Db::connect("postgres://app@target-host/app", 4).await?;
//!
//!     let inspector = Inspector::new();
//!     let source_schema = inspector.inspect(&source).await?;
//!     let target_schema = inspector.inspect(&target).await?;
//!
//!     let result = validate(&source_schema, &target_schema, &[], &ValidateOptions::default());
//!     println!("{} issues, can proceed: {}", result.issues.len(), result.can_proceed);
//!     Ok(())
//! }
//! ```

pub mod compat;
pub mod config;
pub mod db;
pub mod error;
pub mod inspect;
pub mod job;
pub mod migrate;
pub mod schedule;
pub mod schema;
pub mod sync;
pub mod validate;
pub mod value;

// Re-exports for convenient access
pub use config::{Config, DbConfig, SyncSettings};
pub use db::Db;
pub use error::{Result, SyncError};
pub use inspect::Inspector;
pub use job::{
    Checkpoint, CheckpointStore, ConflictStrategy, FileCheckpointStore, JobStatus, JobStore,
    MemoryCheckpointStore, MemoryJobStore, Progress, SyncDirection, SyncJob, TableSyncConfig,
};
pub use migrate::{generate_migration, MigrationDirection, MigrationPlan, MigrationScript};
pub use schedule::{CronSchedule, JobRunner, ScheduledJob, Scheduler};
pub use schema::{Column, DatabaseSchema, EnumType, TableSchema};
pub use sync::pg::{PgTableReader, PgTableWriter};
pub use sync::{
    NullObserver, SyncExecutor, SyncObserver, SyncOptions, SyncReport, TableReader, TableWriter,
};
pub use validate::{validate, Severity, ValidateOptions, ValidationIssue, ValidationResult};
