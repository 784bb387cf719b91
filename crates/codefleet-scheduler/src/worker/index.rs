use async_trait::async_trait;
use chrono::Utc;
use codefleet_core::indexer::Indexer;
use codefleet_core::{IndexFailure, Job, JobKind, JobPayload, RepoState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{WorkError, WorkResult, WorkerContext, WorkerKind, cancellable, checkpoint};

/// Runs the configured indexers over a working copy at its checked-out head.
///
/// The first indexer is primary: its failure fails the job. Failures of the
/// others are recorded on the repository and the job still completes.
pub struct IndexWorker {
    indexers: Vec<Arc<dyn Indexer>>,
}

impl IndexWorker {
    pub fn new(indexers: Vec<Arc<dyn Indexer>>) -> Self {
        Self { indexers }
    }
}

#[async_trait]
impl WorkerKind for IndexWorker {
    const KIND: JobKind = JobKind::Index;
    const IN_PROGRESS: Option<RepoState> = Some(RepoState::Indexing);

    async fn execute(
        &self,
        ctx: &WorkerContext,
        job: &Job,
        token: &CancellationToken,
    ) -> WorkResult<()> {
        let JobPayload::Index { revision, reindex } = &job.payload else {
            return Err(WorkError::permanent("index job without an index payload"));
        };
        let uri = job.repository_uri.as_str();

        let Some(mut record) = ctx.records.get(uri).await? else {
            return Err(WorkError::permanent(format!("{uri} is not tracked")));
        };
        if record.state == RepoState::Deleting {
            return Err(WorkError::Cancelled);
        }
        if record.revision_cloned.is_none() {
            return Err(WorkError::permanent(format!("{uri} has not been cloned")));
        }
        // Indexers scan the working copy, so its head is what gets indexed.
        let target = cancellable(token, ctx.git.head(uri)).await?;
        if let Some(requested) = revision.as_deref().filter(|r| *r != target) {
            info!(repo = %uri, requested, head = %target, "Requested revision is not checked out, indexing head");
        }

        if !reindex && record.revision_indexed.as_deref() == Some(target.as_str()) {
            record.last_indexed_at = Some(Utc::now());
            ctx.records.save(&record).await?;
            info!(repo = %uri, revision = %target, "Revision already indexed");
            return Ok(());
        }

        record.state = RepoState::Indexing;
        ctx.records.save(&record).await?;

        let mut failures = Vec::new();
        for (position, indexer) in self.indexers.iter().enumerate() {
            checkpoint(token)?;
            let name = indexer.name().to_string();
            match cancellable(token, indexer.run(uri, &target)).await {
                Ok(report) if report.success => {
                    failures.extend(report.partial_failures.into_iter().map(|message| {
                        IndexFailure {
                            indexer: name.clone(),
                            message,
                        }
                    }));
                }
                Ok(_) if position == 0 => {
                    return Err(WorkError::permanent(format!("{name} reported failure")));
                }
                Ok(_) => failures.push(IndexFailure {
                    indexer: name,
                    message: "reported failure".to_string(),
                }),
                Err(WorkError::Cancelled) => return Err(WorkError::Cancelled),
                Err(WorkError::Failed { message, retryable }) if position == 0 => {
                    return Err(WorkError::Failed {
                        message: format!("{name}: {message}"),
                        retryable,
                    });
                }
                Err(WorkError::Failed { message, .. }) => {
                    warn!(repo = %uri, indexer = %name, error = %message, "Secondary indexer failed");
                    failures.push(IndexFailure {
                        indexer: name,
                        message,
                    });
                }
            }
        }
        checkpoint(token)?;

        let mut record = ctx.records.get(uri).await?.unwrap_or(record);
        record.state = RepoState::Indexed;
        record.revision_indexed = Some(target.clone());
        record.last_indexed_at = Some(Utc::now());
        record.last_error = None;
        record.retryable = false;
        record.index_failures = failures;
        ctx.records.save(&record).await?;
        info!(repo = %uri, revision = %target, "Repository indexed");
        Ok(())
    }
}
