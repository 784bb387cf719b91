//! Queue persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codefleet_core::{Job, JobId, JobKind, JobStatus};
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};

/// A job together with its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job: Job,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueuedJob {
    pub fn pending(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::Pending,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Storage for queued jobs.
///
/// Implementations enforce at most one non-terminal job per (repository, kind).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `job` as pending.
    ///
    /// With `supersede`, a pending job for the same (repository, kind) is
    /// cancelled first and its id returned. A running job is never superseded.
    async fn insert(&self, job: &Job, supersede: bool) -> QueueResult<Option<JobId>>;

    /// Take the oldest pending job of `kind` and mark it running.
    async fn claim(&self, kind: JobKind) -> QueueResult<Option<Job>>;

    /// Record a terminal status for a running job.
    async fn finish(&self, id: JobId, status: JobStatus, error: Option<&str>) -> QueueResult<()>;

    /// Cancel a job that has not started yet. Returns whether it was pending.
    async fn cancel_pending(&self, id: JobId) -> QueueResult<bool>;

    async fn get(&self, id: JobId) -> QueueResult<Option<QueuedJob>>;

    /// Non-terminal jobs for a repository, oldest first.
    async fn active(&self, repository_uri: &str) -> QueueResult<Vec<QueuedJob>>;

    /// Every job, oldest first.
    async fn list(&self) -> QueueResult<Vec<QueuedJob>>;

    /// Mark every running job failed with `error`. Run at startup, when no
    /// job can still be running, so a crashed process does not hold the
    /// active slot of a (repository, kind) forever.
    async fn recover_interrupted(&self, error: &str) -> QueueResult<Vec<Job>>;

    /// Delete terminal jobs that finished at or before `before`. Returns how many.
    async fn prune(&self, before: DateTime<Utc>) -> QueueResult<u64>;
}

/// In-process queue store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, job: &Job, supersede: bool) -> QueueResult<Option<JobId>> {
        let mut jobs = self.jobs.lock().await;
        let existing = jobs.iter_mut().find(|q| {
            q.is_active() && q.job.kind == job.kind && q.job.repository_uri == job.repository_uri
        });

        let superseded = match existing {
            Some(q) if supersede && q.status == JobStatus::Pending => {
                q.status = JobStatus::Cancelled;
                q.finished_at = Some(Utc::now());
                Some(q.job.id)
            }
            Some(_) => {
                return Err(QueueError::DuplicateActiveJob {
                    repository_uri: job.repository_uri.clone(),
                    kind: job.kind,
                });
            }
            None => None,
        };

        jobs.push(QueuedJob::pending(job.clone()));
        Ok(superseded)
    }

    async fn claim(&self, kind: JobKind) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs
            .iter_mut()
            .find(|q| q.status == JobStatus::Pending && q.job.kind == kind)
            .map(|q| {
                q.status = JobStatus::Running;
                q.started_at = Some(Utc::now());
                q.job.clone()
            }))
    }

    async fn finish(&self, id: JobId, status: JobStatus, error: Option<&str>) -> QueueResult<()> {
        let mut jobs = self.jobs.lock().await;
        let q = jobs
            .iter_mut()
            .find(|q| q.job.id == id)
            .ok_or(QueueError::JobNotFound(id))?;
        q.status = status;
        q.error = error.map(str::to_string);
        q.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn cancel_pending(&self, id: JobId) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs
            .iter_mut()
            .find(|q| q.job.id == id && q.status == JobStatus::Pending)
        {
            Some(q) => {
                q.status = JobStatus::Cancelled;
                q.finished_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<QueuedJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|q| q.job.id == id).cloned())
    }

    async fn active(&self, repository_uri: &str) -> QueueResult<Vec<QueuedJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .iter()
            .filter(|q| q.is_active() && q.job.repository_uri == repository_uri)
            .cloned()
            .collect())
    }

    async fn list(&self) -> QueueResult<Vec<QueuedJob>> {
        Ok(self.jobs.lock().await.clone())
    }

    async fn recover_interrupted(&self, error: &str) -> QueueResult<Vec<Job>> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        Ok(jobs
            .iter_mut()
            .filter(|q| q.status == JobStatus::Running)
            .map(|q| {
                q.status = JobStatus::Failed;
                q.error = Some(error.to_string());
                q.finished_at = Some(now);
                q.job.clone()
            })
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> QueueResult<u64> {
        let mut jobs = self.jobs.lock().await;
        let len = jobs.len();
        jobs.retain(|q| q.is_active() || q.finished_at.is_none_or(|at| at > before));
        Ok((len - jobs.len()) as u64)
    }
}
