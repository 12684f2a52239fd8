//! Sync job state, progress, and checkpoints.
//!
//! A job's status, progress, and checkpoint are the complete resumable
//! state: the surrounding system stores the three fields (JSON) and passes
//! them back unchanged. No other engine state survives a restart. Stores are
//! explicit repository interfaces injected into the engine, never
//! process-lifetime globals.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// Sync direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    OneWay,
    TwoWay,
}

/// Policy for picking a winner when two-way sync finds divergent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LastWriteWins,
    SourceWins,
    TargetWins,
    Manual,
}

/// Per-table sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSyncConfig {
    /// Table name.
    pub table: String,

    /// Whether the table participates in the sync.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Conflict strategy for two-way sync.
    #[serde(default = "default_strategy")]
    pub strategy: ConflictStrategy,
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> ConflictStrategy {
    ConflictStrategy::LastWriteWins
}

impl TableSyncConfig {
    /// Config with defaults for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            enabled: true,
            strategy: ConflictStrategy::LastWriteWins,
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Row and table counters, updated after every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Estimated total rows across enabled tables.
    pub total_rows: i64,

    /// Rows processed so far.
    pub processed_rows: i64,

    /// Rows inserted into the target.
    pub inserted_rows: i64,

    /// Rows updated in the target.
    pub updated_rows: i64,

    /// Rows skipped (conflict kept the target version, or deferred).
    pub skipped_rows: i64,

    /// Enabled tables in this job.
    pub tables_total: usize,

    /// Tables fully processed.
    pub tables_done: usize,

    /// Table currently being processed.
    pub current_table: Option<String>,

    /// Per-table errors recorded so far.
    pub error_count: usize,
}

/// The minimal durable state needed to resume a sync without reprocessing.
///
/// Written after every batch; the only thing read back on restart. Resuming
/// continues strictly after (`last_updated_at`, `last_id`) in the current
/// table and skips `processed_tables` entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Table the job was working on.
    pub table: String,

    /// Row id of the last row covered by a completed batch.
    pub last_id: Uuid,

    /// Change timestamp of that row.
    pub last_updated_at: DateTime<Utc>,

    /// Tables already fully processed.
    pub processed_tables: Vec<String>,

    /// Hash of the job configuration that produced this checkpoint.
    pub config_hash: String,
}

impl Checkpoint {
    /// Whether a table was already fully processed.
    pub fn is_table_done(&self, table: &str) -> bool {
        self.processed_tables.iter().any(|t| t == table)
    }
}

/// A sync job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    /// Job identity.
    pub id: Uuid,

    /// Source connection reference (opaque to the engine core).
    pub source: String,

    /// Target connection reference.
    pub target: String,

    /// Sync direction.
    pub direction: SyncDirection,

    /// Per-table configuration.
    pub tables: Vec<TableSyncConfig>,

    /// Current status.
    pub status: JobStatus,

    /// Progress counters.
    pub progress: Progress,

    /// Resumption state, if any batch has completed.
    pub checkpoint: Option<Checkpoint>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl SyncJob {
    /// Create a pending job.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        direction: SyncDirection,
        tables: Vec<TableSyncConfig>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            target: target.into(),
            direction,
            tables,
            status: JobStatus::Pending,
            progress: Progress::default(),
            checkpoint: None,
            created_at: Utc::now(),
        }
    }

    /// Enabled tables, in configured order.
    pub fn enabled_tables(&self) -> Vec<&TableSyncConfig> {
        self.tables.iter().filter(|t| t.enabled).collect()
    }

    /// Hash of the parts of the configuration a checkpoint depends on.
    ///
    /// A checkpoint from a different configuration must not be resumed:
    /// table lists or direction may have changed under it.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update(self.target.as_bytes());
        hasher.update(format!("{:?}", self.direction).as_bytes());
        for t in &self.tables {
            hasher.update(t.table.as_bytes());
            hasher.update([t.enabled as u8]);
            hasher.update(format!("{:?}", t.strategy).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Mark the job as running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    /// Mark the job as completed.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
    }

    /// Mark the job as failed.
    pub fn mark_failed(&mut self) {
        self.status = JobStatus::Failed;
    }

    /// Mark the job as paused (cancelled cooperatively).
    pub fn mark_paused(&mut self) {
        self.status = JobStatus::Paused;
    }
}

/// Repository interface for job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save (upsert) a job.
    async fn save(&self, job: &SyncJob) -> Result<()>;

    /// Load a job by id.
    async fn load(&self, id: Uuid) -> Result<Option<SyncJob>>;
}

/// Repository interface for checkpoint persistence.
///
/// The executor saves through this after every batch, before requesting the
/// next one, giving at-least-once delivery on crash-resume.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the checkpoint for a job.
    async fn save(&self, job_id: Uuid, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for a job.
    async fn load(&self, job_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Remove the checkpoint once a job completes.
    async fn clear(&self, job_id: Uuid) -> Result<()>;
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, SyncJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &SyncJob) -> Result<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<SyncJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }
}

/// In-memory checkpoint store, for tests and single-process runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<Uuid, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, job_id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .await
            .insert(job_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().await.get(&job_id).cloned())
    }

    async fn clear(&self, job_id: Uuid) -> Result<()> {
        self.checkpoints.lock().await.remove(&job_id);
        Ok(())
    }
}

/// File-backed checkpoint store: one JSON file per job, written atomically
/// (temp file, then rename).
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, job_id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(job_id);
        let content = serde_json::to_string_pretty(checkpoint)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<Checkpoint>> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn clear(&self, job_id: Uuid) -> Result<()> {
        let path = self.path_for(job_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job() -> SyncJob {
        SyncJob::new(
            "source-conn",
            "target-conn",
            SyncDirection::OneWay,
            vec![TableSyncConfig::new("users"), TableSyncConfig::new("orders")],
        )
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = make_job();
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);

        job.mark_paused();
        assert_eq!(job.status, JobStatus::Paused);

        job.mark_running();
        job.mark_completed();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_enabled_tables_filter() {
        let mut job = make_job();
        job.tables[1].enabled = false;

        let enabled = job.enabled_tables();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].table, "users");
    }

    #[test]
    fn test_config_hash_changes_with_tables() {
        let job = make_job();
        let hash1 = job.config_hash();

        let mut changed = job.clone();
        changed.tables[0].strategy = ConflictStrategy::Manual;
        assert_ne!(hash1, changed.config_hash());

        // Identity fields do not affect the hash.
        let mut same = job.clone();
        same.id = Uuid::new_v4();
        assert_eq!(hash1, same.config_hash());
    }

    #[test]
    fn test_checkpoint_table_done() {
        let ckpt = Checkpoint {
            table: "orders".into(),
            last_id: Uuid::new_v4(),
            last_updated_at: Utc::now(),
            processed_tables: vec!["users".into()],
            config_hash: "abc".into(),
        };
        assert!(ckpt.is_table_done("users"));
        assert!(!ckpt.is_table_done("orders"));
    }

    #[test]
    fn test_checkpoint_json_round_trip() {
        let ckpt = Checkpoint {
            table: "users".into(),
            last_id: Uuid::new_v4(),
            last_updated_at: Utc::now(),
            processed_tables: vec![],
            config_hash: "abc".into(),
        };

        let json = serde_json::to_string(&ckpt).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(ckpt, back);
    }

    #[tokio::test]
    async fn test_memory_stores() {
        let jobs = MemoryJobStore::new();
        let job = make_job();
        jobs.save(&job).await.unwrap();
        assert!(jobs.load(job.id).await.unwrap().is_some());
        assert!(jobs.load(Uuid::new_v4()).await.unwrap().is_none());

        let ckpts = MemoryCheckpointStore::new();
        let ckpt = Checkpoint {
            table: "users".into(),
            last_id: Uuid::new_v4(),
            last_updated_at: Utc::now(),
            processed_tables: vec![],
            config_hash: job.config_hash(),
        };
        ckpts.save(job.id, &ckpt).await.unwrap();
        assert_eq!(ckpts.load(job.id).await.unwrap(), Some(ckpt));
        ckpts.clear(job.id).await.unwrap();
        assert!(ckpts.load(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_checkpoint_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let job_id = Uuid::new_v4();

        assert!(store.load(job_id).await.unwrap().is_none());

        let ckpt = Checkpoint {
            table: "users".into(),
            last_id: Uuid::new_v4(),
            last_updated_at: Utc::now(),
            processed_tables: vec!["orders".into()],
            config_hash: "hash".into(),
        };
        store.save(job_id, &ckpt).await.unwrap();

        let loaded = store.load(job_id).await.unwrap().unwrap();
        assert_eq!(loaded, ckpt);

        store.clear(job_id).await.unwrap();
        assert!(store.load(job_id).await.unwrap().is_none());
    }
}
