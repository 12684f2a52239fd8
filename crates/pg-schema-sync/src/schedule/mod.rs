//! Recurring-trigger scheduling.
//!
//! A single periodic scan finds enabled jobs whose `next_run` has passed
//! and dispatches them, instead of arming one OS timer per job. Every
//! execution recomputes the next trigger from "now", so missed windows are
//! skipped rather than backfilled. Triggers that fire while the concurrency
//! cap is exhausted are queued, never dropped.

pub mod cron;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::job::{JobStatus, SyncJob};
use crate::sync::{SyncReport, MAX_CONCURRENT_JOBS};

pub use cron::CronSchedule;

/// How often the scan loop wakes up.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a scheduled execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// A sync job on a cron cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Schedule identity.
    pub id: Uuid,

    /// The job template executed on each trigger.
    pub job: SyncJob,

    /// Cron expression (five fields).
    pub cron: String,

    /// Timezone label carried for the surrounding system; trigger
    /// evaluation happens in UTC.
    pub timezone: String,

    /// Whether the schedule is active. While enabled it always has exactly
    /// one pending trigger (`next_run`).
    pub enabled: bool,

    /// Whether an execution is in flight.
    pub running: bool,

    /// When the job last ran.
    pub last_run: Option<DateTime<Utc>>,

    /// The pending trigger; `None` while disabled.
    pub next_run: Option<DateTime<Utc>>,

    /// Outcome of the last execution. Untouched by disabling.
    pub last_run_status: Option<RunStatus>,
}

impl ScheduledJob {
    /// Create a disabled schedule, validating the cron expression.
    pub fn new(job: SyncJob, cron: impl Into<String>) -> Result<Self> {
        let cron = cron.into();
        CronSchedule::parse(&cron)?;
        Ok(Self {
            id: Uuid::new_v4(),
            job,
            cron,
            timezone: "UTC".to_string(),
            enabled: false,
            running: false,
            last_run: None,
            next_run: None,
            last_run_status: None,
        })
    }

    fn schedule(&self) -> Result<CronSchedule> {
        CronSchedule::parse(&self.cron)
    }
}

/// Executes a job when its trigger fires. The production implementation
/// wraps the sync executor; tests substitute mocks.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &SyncJob) -> Result<SyncReport>;
}

/// Cron-driven dispatcher over a set of scheduled jobs.
///
/// Cheap to clone; clones share the same job table and concurrency cap.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    runner: Arc<dyn JobRunner>,
    jobs: Mutex<HashMap<Uuid, ScheduledJob>>,
    queue: Mutex<VecDeque<Uuid>>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    /// Scheduler with the fleet-wide concurrency cap.
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self::with_concurrency(runner, MAX_CONCURRENT_JOBS)
    }

    /// Scheduler with an explicit concurrency cap.
    pub fn with_concurrency(runner: Arc<dyn JobRunner>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                runner,
                jobs: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(max_concurrent)),
            }),
        }
    }

    /// Register a schedule.
    pub async fn add(&self, job: ScheduledJob) -> Uuid {
        let id = job.id;
        self.inner.jobs.lock().await.insert(id, job);
        id
    }

    /// Enable a schedule and arm its trigger from `now`.
    pub async fn enable(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| SyncError::Schedule(format!("unknown scheduled job {}", id)))?;
        job.enabled = true;
        job.next_run = job.schedule()?.next_run(now);
        Ok(())
    }

    /// Disable a schedule. Cancels the pending trigger without touching
    /// `last_run_status`.
    pub async fn disable(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| SyncError::Schedule(format!("unknown scheduled job {}", id)))?;
        job.enabled = false;
        job.next_run = None;
        Ok(())
    }

    /// Snapshot one schedule.
    pub async fn get(&self, id: Uuid) -> Option<ScheduledJob> {
        self.inner.jobs.lock().await.get(&id).cloned()
    }

    /// One scan: start queued jobs as capacity allows, then dispatch
    /// schedules whose trigger has passed. Returns how many jobs were
    /// started or queued.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut handled = 0;

        // Drain the capacity queue first, FIFO.
        loop {
            let Some(id) = self.inner.queue.lock().await.pop_front() else {
                break;
            };
            if self.try_start(id).await {
                handled += 1;
            } else {
                self.inner.queue.lock().await.push_front(id);
                break;
            }
        }

        let due: Vec<Uuid> = {
            let jobs = self.inner.jobs.lock().await;
            let queue = self.inner.queue.lock().await;
            jobs.values()
                .filter(|j| {
                    j.enabled
                        && !j.running
                        && !queue.contains(&j.id)
                        && j.next_run.map(|t| t <= now).unwrap_or(false)
                })
                .map(|j| j.id)
                .collect()
        };

        for id in due {
            if self.try_start(id).await {
                handled += 1;
            } else {
                // Cap exhausted: queue rather than drop.
                info!("Scheduler at capacity, queueing job {}", id);
                self.inner.queue.lock().await.push_back(id);
                handled += 1;
            }
        }

        handled
    }

    /// Scan until cancelled.
    pub async fn run_until_cancelled(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
    }

    /// Try to start a job now. Returns false when no capacity is left.
    async fn try_start(&self, id: Uuid) -> bool {
        let Ok(permit) = Arc::clone(&self.inner.permits).try_acquire_owned() else {
            return false;
        };

        let claimed = {
            let mut jobs = self.inner.jobs.lock().await;
            match jobs.get_mut(&id) {
                Some(job) if !job.running && job.enabled => {
                    job.running = true;
                    true
                }
                _ => false,
            }
        };

        if !claimed {
            // Disabled or already running since it was queued; the permit
            // just goes back.
            return true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(id, permit).await;
        });
        true
    }
}

impl SchedulerInner {
    async fn execute(self: Arc<Self>, id: Uuid, permit: OwnedSemaphorePermit) {
        let template = {
            let jobs = self.jobs.lock().await;
            jobs.get(&id).map(|j| j.job.clone())
        };
        let Some(template) = template else {
            drop(permit);
            return;
        };

        info!("Scheduler firing job {}", id);
        let result = self.runner.run(&template).await;

        let status = match &result {
            Ok(report) if report.status == JobStatus::Completed => RunStatus::Success,
            Ok(report) => {
                warn!("Scheduled job {} ended with status {:?}", id, report.status);
                RunStatus::Failed
            }
            Err(e) => {
                warn!("Scheduled job {} failed: {}", id, e);
                RunStatus::Failed
            }
        };

        // Recompute the trigger from now: missed windows are skipped.
        let now = Utc::now();
        {
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(&id) {
                job.running = false;
                job.last_run = Some(now);
                job.last_run_status = Some(status);
                job.next_run = if job.enabled {
                    job.schedule().ok().and_then(|s| s.next_run(now))
                } else {
                    None
                };
            }
        }
        drop(permit);
    }
}
