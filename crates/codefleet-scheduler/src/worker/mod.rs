//! Workers that execute repository jobs.
//!
//! A [`Worker`] binds one [`WorkerKind`] to the queue. It owns the shared
//! bookkeeping: the pre-start cancellation check, token registration, and
//! writing failures back to the repository record.

mod clone;
mod delete;
mod index;
mod update;

pub use clone::CloneWorker;
pub use delete::DeleteWorker;
pub use index::IndexWorker;
pub use update::UpdateWorker;

use async_trait::async_trait;
use codefleet_core::git::GitOperations;
use codefleet_core::{Job, JobKind, RepoState};
use codefleet_db::RepositoryRecords;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationService;
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobHandler, JobOutcome, JobQueue, Subscription};

/// Why a job did not complete.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("cancelled")]
    Cancelled,

    #[error("{message}")]
    Failed { message: String, retryable: bool },
}

impl WorkError {
    pub fn permanent(message: impl Into<String>) -> Self {
        WorkError::Failed {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<codefleet_core::Error> for WorkError {
    fn from(err: codefleet_core::Error) -> Self {
        match err {
            codefleet_core::Error::Cancelled => WorkError::Cancelled,
            other => WorkError::Failed {
                retryable: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

impl From<QueueError> for WorkError {
    fn from(err: QueueError) -> Self {
        codefleet_core::Error::from(err).into()
    }
}

pub type WorkResult<T> = std::result::Result<T, WorkError>;

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: JobQueue,
    pub cancellation: Arc<CancellationService>,
    pub records: RepositoryRecords,
    pub git: Arc<dyn GitOperations>,
}

/// The kind-specific part of a worker.
#[async_trait]
pub trait WorkerKind: Send + Sync + 'static {
    const KIND: JobKind;

    /// State the record holds while a job of this kind runs, if any.
    const IN_PROGRESS: Option<RepoState>;

    async fn execute(
        &self,
        ctx: &WorkerContext,
        job: &Job,
        token: &CancellationToken,
    ) -> WorkResult<()>;
}

/// Fail with [`WorkError::Cancelled`] once `token` is cancelled.
pub fn checkpoint(token: &CancellationToken) -> WorkResult<()> {
    if token.is_cancelled() {
        return Err(WorkError::Cancelled);
    }
    Ok(())
}

/// Race `fut` against `token`. The future is dropped on cancellation.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> WorkResult<T>
where
    F: Future<Output = codefleet_core::Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(WorkError::Cancelled),
        result = fut => result.map_err(WorkError::from),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Enqueue a follow-on job, treating an already-active job as success.
pub(crate) async fn enqueue_follow_on(queue: &JobQueue, job: Job, supersede: bool) {
    let (uri, kind) = (job.repository_uri.clone(), job.kind);
    let result = if supersede {
        queue.enqueue_superseding(job).await
    } else {
        queue.enqueue(job).await
    };
    match result {
        Ok(id) => info!(job_id = %id, repo = %uri, %kind, "Enqueued follow-on job"),
        Err(e) if e.is_duplicate() => debug!(repo = %uri, %kind, "Follow-on job already active"),
        Err(e) => warn!(repo = %uri, %kind, error = %e, "Failed to enqueue follow-on job"),
    }
}

pub struct Worker<K: WorkerKind> {
    kind: K,
    ctx: WorkerContext,
    subscription: Mutex<Option<Subscription>>,
}

impl<K: WorkerKind> Worker<K> {
    pub fn new(kind: K, ctx: WorkerContext) -> Arc<Self> {
        Arc::new(Self {
            kind,
            ctx,
            subscription: Mutex::new(None),
        })
    }

    /// Bind this worker as the consumer of its job kind. Binding twice is a no-op.
    pub fn bind(self: &Arc<Self>) -> QueueResult<Arc<Self>> {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_none() {
            let handler: Arc<dyn JobHandler> = self.clone();
            *subscription = Some(self.ctx.queue.bind(K::KIND, handler)?);
        }
        Ok(self.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop consuming jobs, waiting for the current one.
    pub async fn unbind(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unbind().await;
        }
    }

    async fn record_failure(&self, uri: &str, message: &str, retryable: bool) {
        match self.ctx.records.get(uri).await {
            Ok(Some(mut record)) => {
                record.fail(message, retryable);
                if let Err(e) = self.ctx.records.save(&record).await {
                    warn!(repo = %uri, error = %e, "Failed to record job failure");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(repo = %uri, error = %e, "Failed to load repository record"),
        }
    }

    async fn restore_after_cancel(&self, uri: &str, prior: Option<RepoState>) {
        let Some(in_progress) = K::IN_PROGRESS else {
            return;
        };
        let Ok(Some(mut record)) = self.ctx.records.get(uri).await else {
            return;
        };
        if record.state != in_progress {
            return;
        }
        record.state = match prior {
            Some(state) if state != in_progress => state,
            _ => record.settled_state(),
        };
        if let Err(e) = self.ctx.records.save(&record).await {
            warn!(repo = %uri, error = %e, "Failed to restore repository state");
        }
    }
}

#[async_trait]
impl<K: WorkerKind> JobHandler for Worker<K> {
    async fn handle(&self, job: Job, queue_token: CancellationToken) -> JobOutcome {
        let uri = job.repository_uri.clone();
        if queue_token.is_cancelled() || self.ctx.cancellation.is_cancelled(&uri, K::KIND) {
            info!(job_id = %job.id, repo = %uri, kind = %K::KIND, "Job cancelled before start");
            return JobOutcome::Cancelled;
        }

        let prior = match self.ctx.records.get(&uri).await {
            Ok(record) => record.map(|r| r.state),
            Err(e) => return JobOutcome::Failed(e.to_string()),
        };

        let registration = self.ctx.cancellation.register(&uri, K::KIND);
        let token = registration.token.clone();
        let mut run = AssertUnwindSafe(self.kind.execute(&self.ctx, &job, &token)).catch_unwind();
        let result = tokio::select! {
            result = &mut run => result,
            _ = queue_token.cancelled() => {
                token.cancel();
                run.await
            }
        };
        self.ctx.cancellation.unregister(&registration);

        let result = match result {
            Ok(result) => result,
            Err(panic) => {
                let message = format!("job panicked: {}", panic_message(panic.as_ref()));
                error!(job_id = %job.id, repo = %uri, kind = %K::KIND, %message, "Worker panicked");
                self.record_failure(&uri, &message, false).await;
                return JobOutcome::Failed(message);
            }
        };

        match result {
            Ok(()) => JobOutcome::Completed,
            Err(WorkError::Cancelled) => {
                self.restore_after_cancel(&uri, prior).await;
                JobOutcome::Cancelled
            }
            Err(WorkError::Failed { message, retryable }) => {
                self.record_failure(&uri, &message, retryable).await;
                JobOutcome::Failed(message)
            }
        }
    }
}
