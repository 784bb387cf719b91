use async_trait::async_trait;
use chrono::Utc;
use codefleet_core::{Job, JobKind, JobPayload, RepoState, RepositoryRecord};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{WorkError, WorkResult, WorkerContext, WorkerKind, cancellable, checkpoint, enqueue_follow_on};

/// Clones a repository's working copy, then schedules its first index.
#[derive(Debug, Default)]
pub struct CloneWorker;

#[async_trait]
impl WorkerKind for CloneWorker {
    const KIND: JobKind = JobKind::Clone;
    const IN_PROGRESS: Option<RepoState> = Some(RepoState::Cloning);

    async fn execute(
        &self,
        ctx: &WorkerContext,
        job: &Job,
        token: &CancellationToken,
    ) -> WorkResult<()> {
        let JobPayload::Clone { url } = &job.payload else {
            return Err(WorkError::permanent("clone job without a clone payload"));
        };
        let uri = job.repository_uri.as_str();

        let mut record = ctx
            .records
            .get(uri)
            .await?
            .unwrap_or_else(|| RepositoryRecord::new(uri, url.as_str()));
        match record.state {
            state if state.has_clone() => {
                info!(repo = %uri, %state, "Repository already cloned");
                return Ok(());
            }
            RepoState::Deleting => {
                return Err(WorkError::permanent(format!("{uri} is being deleted")));
            }
            _ => {}
        }

        record.url = url.clone();
        record.state = RepoState::Cloning;
        record.last_error = None;
        ctx.records.save(&record).await?;
        checkpoint(token)?;

        let revision = match cancellable(token, ctx.git.clone_repo(url, uri)).await {
            Ok(revision) => revision,
            Err(WorkError::Cancelled) => {
                if let Err(e) = ctx.git.remove(uri).await {
                    warn!(repo = %uri, error = %e, "Failed to remove partial clone");
                }
                return Err(WorkError::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let mut record = ctx.records.get(uri).await?.unwrap_or(record);
        record.state = RepoState::Cloned;
        record.revision_cloned = Some(revision.clone());
        record.last_updated_at = Some(Utc::now());
        record.last_error = None;
        record.retryable = false;
        ctx.records.save(&record).await?;
        info!(repo = %uri, %revision, "Repository cloned");

        enqueue_follow_on(&ctx.queue, Job::index(uri, Some(revision), false), false).await;
        Ok(())
    }
}
