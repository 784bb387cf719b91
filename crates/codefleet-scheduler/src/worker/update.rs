use async_trait::async_trait;
use chrono::Utc;
use codefleet_core::{Job, JobKind, RepoState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{WorkError, WorkResult, WorkerContext, WorkerKind, cancellable, enqueue_follow_on};

/// Fetches a working copy and schedules an index when the head moved.
#[derive(Debug, Default)]
pub struct UpdateWorker;

#[async_trait]
impl WorkerKind for UpdateWorker {
    const KIND: JobKind = JobKind::Update;
    const IN_PROGRESS: Option<RepoState> = None;

    async fn execute(
        &self,
        ctx: &WorkerContext,
        job: &Job,
        token: &CancellationToken,
    ) -> WorkResult<()> {
        let uri = job.repository_uri.as_str();
        let Some(record) = ctx.records.get(uri).await? else {
            return Err(WorkError::permanent(format!("{uri} is not tracked")));
        };
        if record.revision_cloned.is_none() || record.state == RepoState::Deleting {
            return Err(WorkError::permanent(format!("{uri} has no working copy")));
        }

        let head = cancellable(token, ctx.git.fetch(uri)).await?;

        // The record may have been removed while fetching.
        let Some(mut record) = ctx.records.get(uri).await? else {
            return Err(WorkError::Cancelled);
        };
        record.last_updated_at = Some(Utc::now());
        if record.state == RepoState::Error {
            record.state = record.settled_state();
            record.last_error = None;
            record.retryable = false;
        }
        let changed = record.revision_cloned.as_deref() != Some(head.as_str());
        if changed {
            record.revision_cloned = Some(head.clone());
        }
        ctx.records.save(&record).await?;

        if changed {
            info!(repo = %uri, revision = %head, "Repository head moved");
            enqueue_follow_on(&ctx.queue, Job::index(uri, Some(head), false), true).await;
        } else {
            debug!(repo = %uri, "Repository up to date");
        }
        Ok(())
    }
}
