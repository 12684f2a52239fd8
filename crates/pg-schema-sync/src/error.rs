//! Error types for the sync engine.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog inspection failed - no partial schema is returned.
    #[error("Inspection failed: {0}")]
    Inspection(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Migration generation failed.
    #[error("Migration generation failed: {0}")]
    Migration(String),

    /// Sync failed for a specific table (isolated, job continues).
    #[error("Sync failed for table {table}: {message}")]
    Table { table: String, message: String },

    /// Checkpoint belongs to a different job configuration.
    #[error("Checkpoint does not match this job configuration - cannot resume. Start a fresh sync or restore the original configuration.")]
    CheckpointMismatch,

    /// Scheduler error (bad cron expression, unknown job, etc.)
    #[error("Scheduler error: {0}")]
    Schedule(String),

    /// IO error (checkpoint files, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Inspection error.
    pub fn inspection(message: impl Into<String>) -> Self {
        SyncError::Inspection(message.into())
    }

    /// Create a per-table sync error.
    pub fn table(table: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Table {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the whole job must stop rather than
    /// skipping to the next table. Pool acquisition failures indicate the
    /// connection is gone entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Pool { .. } | SyncError::CheckpointMismatch)
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
