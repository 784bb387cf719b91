//! Job types shared by the queue, the workers and the schedulers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::JobId;

/// The kind of work a job performs on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Clone,
    Delete,
    Index,
    Update,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Clone,
        JobKind::Delete,
        JobKind::Index,
        JobKind::Update,
    ];

    /// Kinds that are cancelled when their repository is torn down.
    pub fn is_dependent(&self) -> bool {
        !matches!(self, JobKind::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Clone => "clone",
            JobKind::Delete => "delete",
            JobKind::Index => "index",
            JobKind::Update => "update",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clone" => Ok(JobKind::Clone),
            "delete" => Ok(JobKind::Delete),
            "index" => Ok(JobKind::Index),
            "update" => Ok(JobKind::Update),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

/// Status of a job as recorded by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Kind-specific job arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Clone {
        url: String,
    },
    Delete,
    Index {
        /// Revision to index; the cloned head when absent.
        revision: Option<String>,
        /// Index even if the revision was already indexed.
        #[serde(default)]
        reindex: bool,
    },
    Update,
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Clone { .. } => JobKind::Clone,
            JobPayload::Delete => JobKind::Delete,
            JobPayload::Index { .. } => JobKind::Index,
            JobPayload::Update => JobKind::Update,
        }
    }
}

/// Delivery options for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Redeliver the job on `interval_ms` until it is cancelled.
    pub cyclic: bool,
    pub interval_ms: Option<u64>,
}

impl JobOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            cyclic: true,
            interval_ms: Some(interval.as_millis() as u64),
        }
    }

    /// Redelivery interval, present only for cyclic jobs.
    pub fn interval(&self) -> Option<Duration> {
        match (self.cyclic, self.interval_ms) {
            (true, Some(ms)) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

/// A unit of work for a single repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub repository_uri: String,
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
    pub options: JobOptions,
}

impl Job {
    pub fn new(repository_uri: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: JobId::new(),
            kind: payload.kind(),
            repository_uri: repository_uri.into(),
            payload,
            created_at: Utc::now(),
            options: JobOptions::default(),
        }
    }

    pub fn clone_repo(repository_uri: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(repository_uri, JobPayload::Clone { url: url.into() })
    }

    pub fn delete(repository_uri: impl Into<String>) -> Self {
        Self::new(repository_uri, JobPayload::Delete)
    }

    pub fn index(repository_uri: impl Into<String>, revision: Option<String>, reindex: bool) -> Self {
        Self::new(repository_uri, JobPayload::Index { revision, reindex })
    }

    pub fn update(repository_uri: impl Into<String>) -> Self {
        Self::new(repository_uri, JobPayload::Update)
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// A fresh copy of this job definition with a new id, used for redelivery.
    pub fn redeliver(&self) -> Self {
        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Notification emitted on every job status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Enqueued {
        job_id: JobId,
        kind: JobKind,
        repository_uri: String,
    },
    Started {
        job_id: JobId,
        kind: JobKind,
        repository_uri: String,
    },
    Completed {
        job_id: JobId,
        kind: JobKind,
        repository_uri: String,
    },
    Failed {
        job_id: JobId,
        kind: JobKind,
        repository_uri: String,
        error: String,
    },
    Cancelled {
        job_id: JobId,
        kind: JobKind,
        repository_uri: String,
    },
}

impl LifecycleEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            LifecycleEvent::Enqueued { job_id, .. }
            | LifecycleEvent::Started { job_id, .. }
            | LifecycleEvent::Completed { job_id, .. }
            | LifecycleEvent::Failed { job_id, .. }
            | LifecycleEvent::Cancelled { job_id, .. } => *job_id,
        }
    }
}
