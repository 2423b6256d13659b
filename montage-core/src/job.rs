use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions only move forward: pending -> processing ->
    /// completed | failed. A job may also fail straight from pending
    /// when validation rejects it after creation.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub download_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            download_urls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {id} not found")]
    NotFound { id: Uuid },
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

pub type JobResult<T> = std::result::Result<T, JobError>;

/// Minimal key-value surface the tracker needs. Injected explicitly so
/// handlers never touch hidden shared state and tests can use a fake.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Option<Job>;
    async fn set(&self, job: Job);
    async fn delete(&self, id: Uuid);
}

/// Process-local store backed by a reader/writer-safe map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes terminal jobs whose last update is older than the
    /// retention window. Callers must poll before expiry.
    pub async fn purge_expired(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.terminal() && now - job.updated_at > retention));
        let purged = before - jobs.len();
        if purged > 0 {
            info!(target: "jobs", purged, "expired jobs purged");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    async fn set(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    async fn delete(&self, id: Uuid) {
        self.jobs.write().await.remove(&id);
    }
}

/// Facade over a [`JobStore`] that enforces the forward-only state
/// machine and monotonic progress.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self) -> Job {
        let job = Job::new();
        self.store.set(job.clone()).await;
        job
    }

    pub async fn status(&self, id: Uuid) -> JobResult<Job> {
        self.store
            .get(id)
            .await
            .ok_or(JobError::NotFound { id })
    }

    pub async fn mark_processing(&self, id: Uuid, progress: u8) -> JobResult<()> {
        let mut job = self.status(id).await?;
        self.transition(&mut job, JobStatus::Processing)?;
        job.progress = clamp_progress(job.progress, progress);
        self.persist(job).await;
        Ok(())
    }

    /// Progress never goes backwards; updates on terminal jobs are
    /// dropped with a warning rather than erroring the pipeline.
    pub async fn set_progress(&self, id: Uuid, progress: u8) -> JobResult<()> {
        let mut job = self.status(id).await?;
        if job.status.terminal() {
            warn!(target: "jobs", %id, "progress update on terminal job ignored");
            return Ok(());
        }
        job.progress = clamp_progress(job.progress, progress);
        self.persist(job).await;
        Ok(())
    }

    pub async fn complete(&self, id: Uuid, download_urls: Vec<String>) -> JobResult<()> {
        let mut job = self.status(id).await?;
        self.transition(&mut job, JobStatus::Completed)?;
        job.progress = 100;
        job.download_urls = download_urls;
        self.persist(job).await;
        Ok(())
    }

    /// Marks the job failed, preserving the error text verbatim for the
    /// polling client.
    pub async fn fail(&self, id: Uuid, error: impl Into<String>) -> JobResult<()> {
        let mut job = self.status(id).await?;
        self.transition(&mut job, JobStatus::Failed)?;
        job.error = Some(error.into());
        self.persist(job).await;
        Ok(())
    }

    fn transition(&self, job: &mut Job, next: JobStatus) -> JobResult<()> {
        if !job.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: job.id,
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        Ok(())
    }

    async fn persist(&self, mut job: Job) {
        job.updated_at = Utc::now();
        self.store.set(job).await;
    }
}

fn clamp_progress(current: u8, requested: u8) -> u8 {
    requested.clamp(current, 100)
}
