//! Checkpointed data synchronization.
//!
//! The executor moves rows from source to target for a set of enabled
//! tables in fixed-size batches, using UPSERT semantics keyed on the
//! syncable `id` column and ordered by the change timestamp so a resumed
//! job never re-scans already-migrated rows.
//!
//! The batch loop is the only suspension point. Cancellation is checked
//! exactly once per batch boundary - never mid-batch - so a batch's
//! checkpoint write and the rows it covers are always consistent. The
//! checkpoint is persisted before the next batch is requested, which gives
//! at-least-once delivery on crash-resume; re-upserting the last batch is
//! safe because writes are idempotent UPSERTs keyed by id.

pub mod conflict;
pub mod pg;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::job::{
    Checkpoint, CheckpointStore, ConflictStrategy, JobStatus, Progress, SyncDirection, SyncJob,
};
use crate::schema::UPDATED_AT_CANDIDATES;
use crate::value::SqlValue;
use conflict::Resolution;

/// Default rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Operating limit: tables per job.
pub const MAX_TABLES_PER_JOB: usize = 50;

/// Operating limit: concurrent jobs per process. Enforced by the scheduler;
/// the executor itself runs one job per call.
pub const MAX_CONCURRENT_JOBS: usize = 3;

/// A column the sync loop reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Column name.
    pub name: String,

    /// Underlying storage type.
    pub udt: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>, udt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            udt: udt.into(),
        }
    }
}

/// One row of a syncable table.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRow {
    /// Row identity.
    pub id: Uuid,

    /// Change timestamp.
    pub updated_at: DateTime<Utc>,

    /// Values, parallel to the column list the batch was read with.
    pub values: Vec<SqlValue>,
}

/// Keyset cursor: resume strictly after this (change timestamp, id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCursor {
    pub updated_at: DateTime<Utc>,
    pub id: Uuid,
}

impl From<&Checkpoint> for BatchCursor {
    fn from(c: &Checkpoint) -> Self {
        Self {
            updated_at: c.last_updated_at,
            id: c.last_id,
        }
    }
}

/// Insert/update counts from one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Reads ordered row batches from the source side.
#[async_trait]
pub trait TableReader: Send + Sync {
    /// The columns of a table, in ordinal order.
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnRef>>;

    /// Read the next batch after the cursor, ordered by (change timestamp,
    /// id) ascending.
    async fn read_batch(
        &self,
        table: &str,
        columns: &[ColumnRef],
        after: Option<&BatchCursor>,
        limit: usize,
    ) -> Result<Vec<SyncRow>>;

    /// Estimated row count, from statistics.
    async fn estimate_rows(&self, table: &str) -> Result<i64> {
        let _ = table;
        Ok(0)
    }
}

/// Writes row batches to the target side.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Upsert one batch keyed on `id`.
    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[ColumnRef],
        rows: &[SyncRow],
    ) -> Result<UpsertCounts>;

    /// Load the change timestamps the target currently holds for a set of
    /// row ids. Used by two-way sync to detect divergent rows.
    async fn row_versions(
        &self,
        table: &str,
        change_column: &str,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, DateTime<Utc>>>;
}

/// Observer for progress and table lifecycle events.
///
/// Structured log events go through `tracing`; this interface carries the
/// data the surrounding system persists or forwards.
pub trait SyncObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress) {
        let _ = progress;
    }

    fn on_table_started(&self, table: &str) {
        let _ = table;
    }

    fn on_table_finished(&self, table: &str, report: &TableReport) {
        let _ = (table, report);
    }
}

/// Observer that ignores everything.
pub struct NullObserver;

impl SyncObserver for NullObserver {}

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Rows per batch.
    pub batch_size: usize,

    /// Hard cap on enabled tables per job.
    pub max_tables: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_tables: MAX_TABLES_PER_JOB,
        }
    }
}

/// Per-table outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_skipped: u64,
    /// Row ids deferred by the manual conflict strategy.
    pub deferred_ids: Vec<Uuid>,
    pub error: Option<String>,
    pub completed: bool,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows_inserted: 0,
            rows_updated: 0,
            rows_skipped: 0,
            deferred_ids: Vec::new(),
            error: None,
            completed: false,
        }
    }
}

/// Final result of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Completed, Paused (cancelled), or Failed. Never Completed after a
    /// cancellation.
    pub status: JobStatus,

    /// Latest checkpoint; `None` once the job completed.
    pub checkpoint: Option<Checkpoint>,

    /// Final progress counters.
    pub progress: Progress,

    /// Per-table outcomes.
    pub tables: Vec<TableReport>,

    /// Aggregated error messages, with failed-table identity.
    pub errors: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub rows_per_second: i64,
}

/// The sync executor.
///
/// Reader, writer, and checkpoint store are injected so the engine never
/// relies on process-lifetime globals and tests can run against in-memory
/// fakes.
pub struct SyncExecutor {
    reader: Arc<dyn TableReader>,
    writer: Arc<dyn TableWriter>,
    checkpoints: Arc<dyn CheckpointStore>,
}

enum TableFlow {
    Done(TableReport),
    Cancelled(TableReport),
}

impl SyncExecutor {
    pub fn new(
        reader: Arc<dyn TableReader>,
        writer: Arc<dyn TableWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            reader,
            writer,
            checkpoints,
        }
    }

    /// Run a sync job to completion, pause, or failure.
    ///
    /// Cancellation is cooperative: a cancelled job finishes its current
    /// batch, persists the checkpoint, and returns a Paused report.
    pub async fn run(
        &self,
        job: &SyncJob,
        options: &SyncOptions,
        observer: &dyn SyncObserver,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started_at = Utc::now();
        let config_hash = job.config_hash();

        let tables = job.enabled_tables();
        if tables.len() > options.max_tables {
            return Err(SyncError::Config(format!(
                "job has {} enabled tables, the limit is {}",
                tables.len(),
                options.max_tables
            )));
        }

        // The checkpoint handed back by the caller wins over the store.
        let mut checkpoint = match &job.checkpoint {
            Some(c) => Some(c.clone()),
            None => self.checkpoints.load(job.id).await?,
        };
        if let Some(c) = &checkpoint {
            if c.config_hash != config_hash {
                return Err(SyncError::CheckpointMismatch);
            }
            info!(
                "Resuming job {} from checkpoint at {}.{}",
                job.id, c.table, c.last_id
            );
        }

        let mut progress = Progress {
            tables_total: tables.len(),
            ..Progress::default()
        };
        for cfg in &tables {
            progress.total_rows += self.reader.estimate_rows(&cfg.table).await.unwrap_or(0);
        }

        let mut reports: Vec<TableReport> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for cfg in &tables {
            if checkpoint
                .as_ref()
                .map(|c| c.is_table_done(&cfg.table))
                .unwrap_or(false)
            {
                progress.tables_done += 1;
                continue;
            }

            if cancel.is_cancelled() {
                return Ok(self.finish(
                    JobStatus::Paused,
                    checkpoint,
                    progress,
                    reports,
                    errors,
                    started_at,
                ));
            }

            observer.on_table_started(&cfg.table);
            progress.current_table = Some(cfg.table.clone());

            let flow = self
                .sync_table(
                    job,
                    &cfg.table,
                    cfg.strategy,
                    &config_hash,
                    &mut checkpoint,
                    &mut progress,
                    options,
                    observer,
                    cancel,
                )
                .await;

            match flow {
                Ok(TableFlow::Done(report)) => {
                    progress.tables_done += 1;
                    observer.on_table_finished(&cfg.table, &report);
                    reports.push(report);
                }
                Ok(TableFlow::Cancelled(report)) => {
                    observer.on_table_finished(&cfg.table, &report);
                    reports.push(report);
                    return Ok(self.finish(
                        JobStatus::Paused,
                        checkpoint,
                        progress,
                        reports,
                        errors,
                        started_at,
                    ));
                }
                Err(e) if e.is_fatal() => {
                    // Connection gone: fail with whatever checkpoint was
                    // last persisted.
                    errors.push(format!("{}: {}", cfg.table, e));
                    progress.error_count += 1;
                    let mut report = TableReport::new(&cfg.table);
                    report.error = Some(e.to_string());
                    reports.push(report);
                    return Ok(self.finish(
                        JobStatus::Failed,
                        checkpoint,
                        progress,
                        reports,
                        errors,
                        started_at,
                    ));
                }
                Err(e) => {
                    // Partial-failure isolation: one bad table must not
                    // abort the whole job.
                    warn!("Table {} failed, continuing: {}", cfg.table, e);
                    errors.push(format!("{}: {}", cfg.table, e));
                    progress.error_count += 1;
                    let mut report = TableReport::new(&cfg.table);
                    report.error = Some(e.to_string());
                    reports.push(report);
                }
            }
        }

        progress.current_table = None;

        let status = if errors.is_empty() {
            self.checkpoints.clear(job.id).await?;
            checkpoint = None;
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        Ok(self.finish(status, checkpoint, progress, reports, errors, started_at))
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_table(
        &self,
        job: &SyncJob,
        table: &str,
        strategy: ConflictStrategy,
        config_hash: &str,
        checkpoint: &mut Option<Checkpoint>,
        progress: &mut Progress,
        options: &SyncOptions,
        observer: &dyn SyncObserver,
        cancel: &CancellationToken,
    ) -> Result<TableFlow> {
        let columns = self.reader.table_columns(table).await?;
        let change_column = find_change_column(&columns)
            .ok_or_else(|| SyncError::table(table, "no usable change-timestamp column"))?;

        let mut report = TableReport::new(table);
        let mut after: Option<BatchCursor> = checkpoint
            .as_ref()
            .filter(|c| c.table == table)
            .map(BatchCursor::from);

        loop {
            let rows = self
                .reader
                .read_batch(table, &columns, after.as_ref(), options.batch_size)
                .await?;

            let Some(last) = rows.last() else {
                self.complete_table(job, table, config_hash, checkpoint, &after)
                    .await?;
                report.completed = true;
                return Ok(TableFlow::Done(report));
            };

            let batch_len = rows.len();
            let cursor = BatchCursor {
                updated_at: last.updated_at,
                id: last.id,
            };

            let to_write = match job.direction {
                SyncDirection::OneWay => rows,
                SyncDirection::TwoWay => {
                    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
                    let versions = self
                        .writer
                        .row_versions(table, &change_column, &ids)
                        .await?;

                    let mut winners = Vec::with_capacity(rows.len());
                    for row in rows {
                        match versions.get(&row.id) {
                            None => winners.push(row),
                            Some(target_updated) => {
                                match conflict::resolve(strategy, row.updated_at, *target_updated)
                                {
                                    Resolution::WriteSource => winners.push(row),
                                    Resolution::KeepTarget => report.rows_skipped += 1,
                                    Resolution::Defer => {
                                        report.deferred_ids.push(row.id);
                                        report.rows_skipped += 1;
                                    }
                                }
                            }
                        }
                    }
                    winners
                }
            };

            if !to_write.is_empty() {
                let counts = self.writer.upsert_batch(table, &columns, &to_write).await?;
                report.rows_inserted += counts.inserted;
                report.rows_updated += counts.updated;
                progress.inserted_rows += counts.inserted as i64;
                progress.updated_rows += counts.updated as i64;
            }

            progress.processed_rows += batch_len as i64;
            progress.skipped_rows += (batch_len - to_write.len()) as i64;

            // Persist the checkpoint before requesting the next batch.
            let new_checkpoint = Checkpoint {
                table: table.to_string(),
                last_id: cursor.id,
                last_updated_at: cursor.updated_at,
                processed_tables: checkpoint
                    .as_ref()
                    .map(|c| c.processed_tables.clone())
                    .unwrap_or_default(),
                config_hash: config_hash.to_string(),
            };
            self.checkpoints.save(job.id, &new_checkpoint).await?;
            *checkpoint = Some(new_checkpoint);
            after = Some(cursor);

            observer.on_progress(progress);

            if batch_len < options.batch_size {
                self.complete_table(job, table, config_hash, checkpoint, &after)
                    .await?;
                report.completed = true;
                return Ok(TableFlow::Done(report));
            }

            // One cancellation check per batch boundary, after the
            // checkpoint write.
            if cancel.is_cancelled() {
                info!("Job {} cancelled after a batch of {}", job.id, table);
                return Ok(TableFlow::Cancelled(report));
            }
        }
    }

    /// Record a table as fully processed in the checkpoint.
    async fn complete_table(
        &self,
        job: &SyncJob,
        table: &str,
        config_hash: &str,
        checkpoint: &mut Option<Checkpoint>,
        after: &Option<BatchCursor>,
    ) -> Result<()> {
        let mut processed = checkpoint
            .as_ref()
            .map(|c| c.processed_tables.clone())
            .unwrap_or_default();
        if !processed.iter().any(|t| t == table) {
            processed.push(table.to_string());
        }

        let (last_id, last_updated_at) = match after {
            Some(cursor) => (cursor.id, cursor.updated_at),
            None => (Uuid::nil(), DateTime::UNIX_EPOCH),
        };

        let new_checkpoint = Checkpoint {
            table: table.to_string(),
            last_id,
            last_updated_at,
            processed_tables: processed,
            config_hash: config_hash.to_string(),
        };
        self.checkpoints.save(job.id, &new_checkpoint).await?;
        *checkpoint = Some(new_checkpoint);
        Ok(())
    }

    fn finish(
        &self,
        status: JobStatus,
        checkpoint: Option<Checkpoint>,
        progress: Progress,
        tables: Vec<TableReport>,
        errors: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> SyncReport {
        let finished_at = Utc::now();
        let duration_seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_per_second = if duration_seconds > 0.0 {
            (progress.processed_rows as f64 / duration_seconds) as i64
        } else {
            0
        };

        progress_summary(&progress, status);

        SyncReport {
            status,
            checkpoint,
            progress,
            tables,
            errors,
            started_at,
            finished_at,
            duration_seconds,
            rows_per_second,
        }
    }
}

fn progress_summary(progress: &Progress, status: JobStatus) {
    info!(
        "Sync {:?}: {}/{} tables, {} rows processed ({} inserted, {} updated, {} skipped), {} errors",
        status,
        progress.tables_done,
        progress.tables_total,
        progress.processed_rows,
        progress.inserted_rows,
        progress.updated_rows,
        progress.skipped_rows,
        progress.error_count
    );
}

/// Find the change-timestamp column among a table's columns.
pub fn find_change_column(columns: &[ColumnRef]) -> Option<String> {
    UPDATED_AT_CANDIDATES.iter().find_map(|name| {
        columns
            .iter()
            .find(|c| {
                c.name.eq_ignore_ascii_case(name)
                    && matches!(c.udt.as_str(), "timestamp" | "timestamptz")
            })
            .map(|c| c.name.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ConflictStrategy, MemoryCheckpointStore, TableSyncConfig};
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn columns() -> Vec<ColumnRef> {
        vec![
            ColumnRef::new("id", "uuid"),
            ColumnRef::new("updated_at", "timestamptz"),
            ColumnRef::new("name", "text"),
        ]
    }

    fn make_row(updated_at: DateTime<Utc>, name: &str) -> SyncRow {
        let id = Uuid::new_v4();
        SyncRow {
            id,
            updated_at,
            values: vec![
                SqlValue::Uuid(id),
                SqlValue::Timestamp(updated_at),
                SqlValue::Text(name.to_string()),
            ],
        }
    }

    fn make_rows(n: usize) -> Vec<SyncRow> {
        let base = Utc::now() - Duration::hours(1);
        (0..n)
            .map(|i| make_row(base + Duration::seconds(i as i64), &format!("row-{}", i)))
            .collect()
    }

    #[derive(Default)]
    struct FakeReader {
        tables: HashMap<String, Vec<SyncRow>>,
        fail_tables: HashSet<String>,
    }

    impl FakeReader {
        fn with_table(mut self, name: &str, rows: Vec<SyncRow>) -> Self {
            self.tables.insert(name.to_string(), rows);
            self
        }

        fn with_failing(mut self, name: &str) -> Self {
            self.fail_tables.insert(name.to_string());
            self.tables.insert(name.to_string(), vec![]);
            self
        }
    }

    #[async_trait]
    impl TableReader for FakeReader {
        async fn table_columns(&self, table: &str) -> Result<Vec<ColumnRef>> {
            if self.fail_tables.contains(table) {
                return Err(SyncError::table(table, "relation vanished"));
            }
            Ok(columns())
        }

        async fn read_batch(
            &self,
            table: &str,
            _columns: &[ColumnRef],
            after: Option<&BatchCursor>,
            limit: usize,
        ) -> Result<Vec<SyncRow>> {
            let rows = self
                .tables
                .get(table)
                .ok_or_else(|| SyncError::table(table, "unknown table"))?;

            Ok(rows
                .iter()
                .filter(|r| match after {
                    Some(c) => (r.updated_at, r.id) > (c.updated_at, c.id),
                    None => true,
                })
                .take(limit)
                .cloned()
                .collect())
        }

        async fn estimate_rows(&self, table: &str) -> Result<i64> {
            Ok(self.tables.get(table).map(|r| r.len() as i64).unwrap_or(0))
        }
    }

    #[derive(Default)]
    struct FakeWriter {
        rows: Mutex<HashMap<String, HashMap<Uuid, SyncRow>>>,
        fail_fatally: bool,
    }

    impl FakeWriter {
        fn seed(&self, table: &str, rows: Vec<SyncRow>) {
            let mut guard = self.rows.lock().unwrap();
            let entry = guard.entry(table.to_string()).or_default();
            for row in rows {
                entry.insert(row.id, row);
            }
        }

        fn snapshot(&self, table: &str) -> HashMap<Uuid, SyncRow> {
            self.rows
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl TableWriter for FakeWriter {
        async fn upsert_batch(
            &self,
            table: &str,
            _columns: &[ColumnRef],
            rows: &[SyncRow],
        ) -> Result<UpsertCounts> {
            if self.fail_fatally {
                return Err(SyncError::pool("connection lost", "upserting batch"));
            }
            let mut guard = self.rows.lock().unwrap();
            let entry = guard.entry(table.to_string()).or_default();
            let mut counts = UpsertCounts::default();
            for row in rows {
                if entry.insert(row.id, row.clone()).is_some() {
                    counts.updated += 1;
                } else {
                    counts.inserted += 1;
                }
            }
            Ok(counts)
        }

        async fn row_versions(
            &self,
            table: &str,
            _change_column: &str,
            ids: &[Uuid],
        ) -> Result<HashMap<Uuid, DateTime<Utc>>> {
            let guard = self.rows.lock().unwrap();
            let empty = HashMap::new();
            let entry = guard.get(table).unwrap_or(&empty);
            Ok(ids
                .iter()
                .filter_map(|id| entry.get(id).map(|r| (*id, r.updated_at)))
                .collect())
        }
    }

    /// Cancels the token after N progress callbacks (N completed batches).
    struct CancelAfter {
        token: CancellationToken,
        after: usize,
        seen: AtomicUsize,
    }

    impl CancelAfter {
        fn new(token: CancellationToken, after: usize) -> Self {
            Self {
                token,
                after,
                seen: AtomicUsize::new(0),
            }
        }
    }

    impl SyncObserver for CancelAfter {
        fn on_progress(&self, _progress: &Progress) {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
        }
    }

    fn one_way_job(tables: &[&str]) -> SyncJob {
        SyncJob::new(
            "src",
            "tgt",
            SyncDirection::OneWay,
            tables.iter().map(|t| TableSyncConfig::new(*t)).collect(),
        )
    }

    fn small_batches() -> SyncOptions {
        SyncOptions {
            batch_size: 10,
            ..SyncOptions::default()
        }
    }

    #[tokio::test]
    async fn test_one_way_sync_completes() {
        let rows = make_rows(25);
        let reader = Arc::new(FakeReader::default().with_table("users", rows.clone()));
        let writer = Arc::new(FakeWriter::default());
        let store = Arc::new(MemoryCheckpointStore::new());

        let executor = SyncExecutor::new(reader, writer.clone(), store.clone());
        let job = one_way_job(&["users"]);

        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.checkpoint.is_none());
        assert_eq!(report.progress.processed_rows, 25);
        assert_eq!(report.progress.inserted_rows, 25);
        assert_eq!(report.progress.tables_done, 1);
        assert_eq!(writer.snapshot("users").len(), 25);
        assert!(report.errors.is_empty());

        // Checkpoint store is cleared on completion.
        assert!(store.load(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_returns_paused_with_checkpoint() {
        let rows = make_rows(30);
        let reader = Arc::new(FakeReader::default().with_table("users", rows));
        let writer = Arc::new(FakeWriter::default());
        let store = Arc::new(MemoryCheckpointStore::new());

        let executor = SyncExecutor::new(reader, writer.clone(), store);
        let job = one_way_job(&["users"]);

        let token = CancellationToken::new();
        let observer = CancelAfter::new(token.clone(), 1);

        let report = executor
            .run(&job, &small_batches(), &observer, &token)
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Paused);
        let checkpoint = report.checkpoint.expect("paused result carries a checkpoint");
        assert_eq!(checkpoint.table, "users");
        // Exactly the first batch was written before stopping.
        assert_eq!(writer.snapshot("users").len(), 10);
        assert_eq!(report.progress.processed_rows, 10);
    }

    #[tokio::test]
    async fn test_resume_equals_single_pass() {
        let rows = make_rows(25);

        // Reference: one uncancelled pass.
        let reference_writer = Arc::new(FakeWriter::default());
        let executor = SyncExecutor::new(
            Arc::new(FakeReader::default().with_table("users", rows.clone())),
            reference_writer.clone(),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let job = one_way_job(&["users"]);
        executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        // Interrupted run: cancel after one batch, then resume.
        let writer = Arc::new(FakeWriter::default());
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = SyncExecutor::new(
            Arc::new(FakeReader::default().with_table("users", rows.clone())),
            writer.clone(),
            store.clone(),
        );

        let mut job = one_way_job(&["users"]);
        let token = CancellationToken::new();
        let observer = CancelAfter::new(token.clone(), 1);
        let paused = executor
            .run(&job, &small_batches(), &observer, &token)
            .await
            .unwrap();
        assert_eq!(paused.status, JobStatus::Paused);

        job.checkpoint = paused.checkpoint;
        let resumed = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resumed.status, JobStatus::Completed);
        assert_eq!(writer.snapshot("users"), reference_writer.snapshot("users"));
    }

    #[tokio::test]
    async fn test_processed_tables_skipped_on_resume() {
        let reader = Arc::new(
            FakeReader::default()
                .with_table("users", make_rows(5))
                .with_table("orders", make_rows(5)),
        );
        let writer = Arc::new(FakeWriter::default());
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = SyncExecutor::new(reader, writer.clone(), store);

        let mut job = one_way_job(&["users", "orders"]);
        job.checkpoint = Some(Checkpoint {
            table: "users".into(),
            last_id: Uuid::nil(),
            last_updated_at: DateTime::UNIX_EPOCH,
            processed_tables: vec!["users".into()],
            config_hash: job.config_hash(),
        });

        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        // users was not reprocessed.
        assert!(writer.snapshot("users").is_empty());
        assert_eq!(writer.snapshot("orders").len(), 5);
    }

    #[tokio::test]
    async fn test_checkpoint_from_other_config_is_rejected() {
        let executor = SyncExecutor::new(
            Arc::new(FakeReader::default().with_table("users", vec![])),
            Arc::new(FakeWriter::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );

        let mut job = one_way_job(&["users"]);
        job.checkpoint = Some(Checkpoint {
            table: "users".into(),
            last_id: Uuid::nil(),
            last_updated_at: DateTime::UNIX_EPOCH,
            processed_tables: vec![],
            config_hash: "someone-elses-config".into(),
        });

        let err = executor
            .run(&job, &SyncOptions::default(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CheckpointMismatch));
    }

    #[tokio::test]
    async fn test_table_failure_is_isolated() {
        let reader = Arc::new(
            FakeReader::default()
                .with_failing("bad")
                .with_table("users", make_rows(5)),
        );
        let writer = Arc::new(FakeWriter::default());
        let executor =
            SyncExecutor::new(reader, writer.clone(), Arc::new(MemoryCheckpointStore::new()));

        let job = one_way_job(&["bad", "users"]);
        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        // The bad table is recorded; the good one still synced.
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bad:"));
        assert_eq!(report.progress.error_count, 1);
        assert_eq!(writer.snapshot("users").len(), 5);

        let bad_report = report.tables.iter().find(|t| t.table == "bad").unwrap();
        assert!(bad_report.error.is_some());
        assert!(!bad_report.completed);
    }

    #[tokio::test]
    async fn test_pool_loss_fails_job_immediately() {
        let reader = Arc::new(
            FakeReader::default()
                .with_table("users", make_rows(5))
                .with_table("orders", make_rows(5)),
        );
        let writer = Arc::new(FakeWriter {
            fail_fatally: true,
            ..FakeWriter::default()
        });
        let executor =
            SyncExecutor::new(reader, writer, Arc::new(MemoryCheckpointStore::new()));

        let job = one_way_job(&["users", "orders"]);
        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Failed);
        // The second table was never attempted.
        assert_eq!(report.tables.len(), 1);
    }

    #[tokio::test]
    async fn test_two_way_last_write_wins() {
        let base = Utc::now() - Duration::hours(1);

        let newer_in_target = make_row(base + Duration::seconds(1), "source-old");
        let newer_in_source = make_row(base + Duration::seconds(2), "source-new");
        let only_in_source = make_row(base + Duration::seconds(3), "source-only");

        let reader = Arc::new(FakeReader::default().with_table(
            "users",
            vec![
                newer_in_target.clone(),
                newer_in_source.clone(),
                only_in_source.clone(),
            ],
        ));

        let writer = Arc::new(FakeWriter::default());
        // Target holds a newer version of the first row and an older
        // version of the second.
        let target_newer = SyncRow {
            id: newer_in_target.id,
            updated_at: base + Duration::hours(2),
            values: vec![
                SqlValue::Uuid(newer_in_target.id),
                SqlValue::Timestamp(base + Duration::hours(2)),
                SqlValue::Text("target-newer".into()),
            ],
        };
        let target_older = SyncRow {
            id: newer_in_source.id,
            updated_at: base - Duration::hours(2),
            values: vec![
                SqlValue::Uuid(newer_in_source.id),
                SqlValue::Timestamp(base - Duration::hours(2)),
                SqlValue::Text("target-older".into()),
            ],
        };
        writer.seed("users", vec![target_newer.clone(), target_older]);

        let executor =
            SyncExecutor::new(reader, writer.clone(), Arc::new(MemoryCheckpointStore::new()));
        let job = SyncJob::new(
            "src",
            "tgt",
            SyncDirection::TwoWay,
            vec![TableSyncConfig::new("users")],
        );

        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);

        let state = writer.snapshot("users");
        // Target-newer row kept its target version; source row left unchanged.
        assert_eq!(state.get(&newer_in_target.id), Some(&target_newer));
        // Source-newer row overwrote the target.
        assert_eq!(state.get(&newer_in_source.id), Some(&newer_in_source));
        // Row absent from target was inserted.
        assert_eq!(state.get(&only_in_source.id), Some(&only_in_source));

        assert_eq!(report.progress.skipped_rows, 1);
        assert_eq!(report.progress.inserted_rows, 1);
        assert_eq!(report.progress.updated_rows, 1);
    }

    #[tokio::test]
    async fn test_manual_strategy_defers_divergent_rows() {
        let base = Utc::now() - Duration::hours(1);
        let divergent = make_row(base + Duration::seconds(5), "source-version");

        let reader =
            Arc::new(FakeReader::default().with_table("users", vec![divergent.clone()]));
        let writer = Arc::new(FakeWriter::default());
        let target_version = SyncRow {
            id: divergent.id,
            updated_at: base,
            values: vec![
                SqlValue::Uuid(divergent.id),
                SqlValue::Timestamp(base),
                SqlValue::Text("target-version".into()),
            ],
        };
        writer.seed("users", vec![target_version.clone()]);

        let executor =
            SyncExecutor::new(reader, writer.clone(), Arc::new(MemoryCheckpointStore::new()));
        let mut tables = vec![TableSyncConfig::new("users")];
        tables[0].strategy = ConflictStrategy::Manual;
        let job = SyncJob::new("src", "tgt", SyncDirection::TwoWay, tables);

        let report = executor
            .run(&job, &small_batches(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        // Neither side written; the id is recorded for manual resolution.
        let users = report.tables.iter().find(|t| t.table == "users").unwrap();
        assert_eq!(users.deferred_ids, vec![divergent.id]);
        assert_eq!(
            writer.snapshot("users").get(&divergent.id),
            Some(&target_version)
        );
    }

    #[tokio::test]
    async fn test_empty_table_completes() {
        let reader = Arc::new(FakeReader::default().with_table("users", vec![]));
        let executor = SyncExecutor::new(
            reader,
            Arc::new(FakeWriter::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );

        let job = one_way_job(&["users"]);
        let report = executor
            .run(&job, &SyncOptions::default(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.progress.processed_rows, 0);
        assert_eq!(report.progress.tables_done, 1);
    }

    #[tokio::test]
    async fn test_table_limit_enforced() {
        let executor = SyncExecutor::new(
            Arc::new(FakeReader::default()),
            Arc::new(FakeWriter::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );

        let names: Vec<String> = (0..51).map(|i| format!("t{}", i)).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let job = one_way_job(&name_refs);

        let err = executor
            .run(&job, &SyncOptions::default(), &NullObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_find_change_column() {
        let cols = columns();
        assert_eq!(find_change_column(&cols), Some("updated_at".to_string()));

        let no_ts = vec![ColumnRef::new("id", "uuid"), ColumnRef::new("name", "text")];
        assert_eq!(find_change_column(&no_ts), None);

        // Candidate name with a non-timestamp type does not qualify.
        let wrong_type = vec![ColumnRef::new("updated_at", "varchar")];
        assert_eq!(find_change_column(&wrong_type), None);
    }
}
