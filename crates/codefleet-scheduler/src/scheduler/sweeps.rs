use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codefleet_core::{Job, RepoState, RepositoryRecord, RepositoryUri};
use codefleet_db::RepositoryRecords;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Sweep, enqueue_quietly};
use crate::queue::JobQueue;

/// Whether `last` is at least `threshold` ago. Never having run counts as stale.
pub fn is_stale(last: Option<DateTime<Utc>>, threshold: Duration, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(at) => (now - at).to_std().is_ok_and(|age| age >= threshold),
    }
}

fn retryable_error(record: &RepositoryRecord) -> bool {
    record.state == RepoState::Error && record.retryable
}

/// Clones every configured repository that has no working copy yet,
/// including clones that were interrupted or failed.
pub struct CloneSweep {
    queue: JobQueue,
    records: RepositoryRecords,
    repos: Vec<String>,
}

impl CloneSweep {
    pub fn new(queue: JobQueue, records: RepositoryRecords, repos: Vec<String>) -> Self {
        Self {
            queue,
            records,
            repos,
        }
    }
}

#[async_trait]
impl Sweep for CloneSweep {
    fn name(&self) -> &'static str {
        "clone-scheduler"
    }

    async fn sweep(&self) -> usize {
        let mut enqueued = 0;
        for url in &self.repos {
            let uri = match RepositoryUri::from_url(url) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(%url, error = %e, "Skipping configured repository");
                    continue;
                }
            };
            let record = match self.records.get(uri.as_str()).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    let record = RepositoryRecord::new(uri.as_str(), url.as_str());
                    if let Err(e) = self.records.save(&record).await {
                        warn!(repo = %uri, error = %e, "Failed to create repository record");
                        continue;
                    }
                    record
                }
                Err(e) => {
                    warn!(repo = %uri, error = %e, "Failed to load repository record");
                    continue;
                }
            };

            if record.needs_clone()
                && enqueue_quietly(&self.queue, Job::clone_repo(uri.as_str(), url.as_str())).await {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            info!(enqueued, "Scheduled repository clones");
        }
        enqueued
    }
}

/// Fetches repositories whose last update is older than a threshold.
///
/// Also owns the periodic retry of clones that failed transiently: such a
/// record has no clone revision, so it is re-enqueued as a clone.
pub struct UpdateSweep {
    queue: JobQueue,
    records: RepositoryRecords,
    threshold: Duration,
}

impl UpdateSweep {
    pub fn new(queue: JobQueue, records: RepositoryRecords, threshold: Duration) -> Self {
        Self {
            queue,
            records,
            threshold,
        }
    }
}

#[async_trait]
impl Sweep for UpdateSweep {
    fn name(&self) -> &'static str {
        "update-scheduler"
    }

    async fn sweep(&self) -> usize {
        let records = match self.records.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list repositories for update");
                return 0;
            }
        };
        let now = Utc::now();
        let mut enqueued = 0;
        for record in records {
            if !is_stale(record.last_updated_at, self.threshold, now) {
                continue;
            }
            let job = if record.revision_cloned.is_none() {
                if !retryable_error(&record) {
                    continue;
                }
                debug!(repo = %record.uri, "Retrying failed clone");
                Job::clone_repo(record.uri.as_str(), record.url.as_str())
            } else if matches!(record.state, RepoState::Cloned | RepoState::Indexed)
                || retryable_error(&record)
            {
                Job::update(record.uri.as_str())
            } else {
                continue;
            };
            if enqueue_quietly(&self.queue, job).await {
                enqueued += 1;
            }
        }
        enqueued
    }
}

/// Reindexes repositories whose last index is older than a threshold.
pub struct IndexSweep {
    queue: JobQueue,
    records: RepositoryRecords,
    threshold: Duration,
}

impl IndexSweep {
    pub fn new(queue: JobQueue, records: RepositoryRecords, threshold: Duration) -> Self {
        Self {
            queue,
            records,
            threshold,
        }
    }
}

#[async_trait]
impl Sweep for IndexSweep {
    fn name(&self) -> &'static str {
        "index-scheduler"
    }

    async fn sweep(&self) -> usize {
        let records = match self.records.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list repositories for indexing");
                return 0;
            }
        };
        let now = Utc::now();
        let mut enqueued = 0;
        for record in records {
            let eligible = record.revision_cloned.is_some()
                && record.state != RepoState::Deleting
                && (record.state != RepoState::Error || record.retryable);
            if eligible
                && is_stale(record.last_indexed_at, self.threshold, now)
                && enqueue_quietly(&self.queue, Job::index(record.uri.as_str(), None, false)).await
            {
                enqueued += 1;
            }
        }
        enqueued
    }
}
