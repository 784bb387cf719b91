use async_trait::async_trait;
use codefleet_core::indexer::Indexer;
use codefleet_core::{Job, JobKind, JobStatus, RepoState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{WorkError, WorkResult, WorkerContext, WorkerKind, cancellable, checkpoint};

const DRAIN_POLL: Duration = Duration::from_millis(25);

const DEPENDENT_KINDS: [JobKind; 3] = [JobKind::Clone, JobKind::Index, JobKind::Update];

/// Removes a repository: its working copy, indexed documents and record.
///
/// Clone, index and update work for the repository is cancelled first and
/// allowed to drain before anything is removed.
pub struct DeleteWorker {
    indexers: Vec<Arc<dyn Indexer>>,
    drain_timeout: Duration,
}

impl DeleteWorker {
    pub fn new(indexers: Vec<Arc<dyn Indexer>>, drain_timeout: Duration) -> Self {
        Self {
            indexers,
            drain_timeout,
        }
    }

    async fn wait_for_drain(
        &self,
        ctx: &WorkerContext,
        uri: &str,
        token: &CancellationToken,
    ) -> WorkResult<()> {
        let deadline = Instant::now() + self.drain_timeout;
        loop {
            let running = ctx
                .queue
                .active(uri)
                .await?
                .into_iter()
                .filter(|q| q.status == JobStatus::Running && q.job.kind.is_dependent())
                .count();
            if running == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(WorkError::Failed {
                    message: format!(
                        "{running} job(s) for {uri} still running after {:?}",
                        self.drain_timeout
                    ),
                    retryable: true,
                });
            }
            debug!(repo = %uri, running, "Waiting for repository jobs to stop");
            checkpoint(token)?;
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

#[async_trait]
impl WorkerKind for DeleteWorker {
    const KIND: JobKind = JobKind::Delete;
    const IN_PROGRESS: Option<RepoState> = Some(RepoState::Deleting);

    async fn execute(
        &self,
        ctx: &WorkerContext,
        job: &Job,
        token: &CancellationToken,
    ) -> WorkResult<()> {
        let uri = job.repository_uri.as_str();
        ctx.cancellation.cancel_all(uri);

        let Some(mut record) = ctx.records.get(uri).await? else {
            info!(repo = %uri, "Repository not tracked, nothing to delete");
            return Ok(());
        };
        record.state = RepoState::Deleting;
        ctx.records.save(&record).await?;

        let cancelled = ctx.queue.cancel_pending_for(uri, &DEPENDENT_KINDS).await?;
        if !cancelled.is_empty() {
            info!(repo = %uri, count = cancelled.len(), "Cancelled pending repository jobs");
        }
        self.wait_for_drain(ctx, uri, token).await?;
        checkpoint(token)?;

        cancellable(token, ctx.git.remove(uri)).await?;
        for indexer in &self.indexers {
            indexer.clear(uri).await?;
        }
        ctx.records.delete(uri).await?;
        info!(repo = %uri, "Repository deleted");
        Ok(())
    }
}
