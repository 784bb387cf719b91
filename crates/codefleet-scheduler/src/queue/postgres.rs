//! Queue store backed by PostgreSQL.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED`; the partial unique index
//! `job_queue_active_idx` rejects a second non-terminal job per repository and kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codefleet_core::{Job, JobId, JobKind, JobOptions, JobPayload, JobStatus};
use sqlx::PgPool;

use super::store::{QueueStore, QueuedJob};
use crate::error::{QueueError, QueueResult};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    kind: String,
    repository_uri: String,
    payload: serde_json::Value,
    options: serde_json::Value,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = QueueError;

    fn try_from(row: JobRow) -> QueueResult<Self> {
        let kind: JobKind = row
            .kind
            .parse()
            .map_err(|_| QueueError::InvalidData(format!("unknown job kind: {}", row.kind)))?;
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|_| QueueError::InvalidData(format!("unknown job status: {}", row.status)))?;
        let payload: JobPayload = serde_json::from_value(row.payload)?;
        let options: JobOptions = serde_json::from_value(row.options)?;

        Ok(QueuedJob {
            job: Job {
                id: JobId::from(row.id),
                kind,
                repository_uri: row.repository_uri,
                payload,
                created_at: row.created_at,
                options,
            },
            status,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert(&self, job: &Job, supersede: bool) -> QueueResult<Option<JobId>> {
        let mut tx = self.pool.begin().await?;

        let superseded = if supersede {
            sqlx::query_scalar::<_, uuid::Uuid>(
                r#"
                UPDATE job_queue
                SET status = 'cancelled', finished_at = NOW()
                WHERE repository_uri = $1 AND kind = $2 AND status = 'pending'
                RETURNING id
                "#,
            )
            .bind(&job.repository_uri)
            .bind(job.kind.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .map(JobId::from)
        } else {
            None
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO job_queue (id, kind, repository_uri, payload, options, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(&job.repository_uri)
        .bind(serde_json::to_value(&job.payload)?)
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(superseded)
            }
            Err(e) if is_unique_violation(&e) => Err(QueueError::DuplicateActiveJob {
                repository_uri: job.repository_uri.clone(),
                kind: job.kind,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim(&self, kind: JobKind) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE job_queue
            SET status = 'running', started_at = NOW()
            WHERE id = (
                SELECT id FROM job_queue
                WHERE status = 'pending' AND kind = $1
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| QueuedJob::try_from(r).map(|q| q.job))
            .transpose()
    }

    async fn finish(&self, id: JobId, status: JobStatus, error: Option<&str>) -> QueueResult<()> {
        let result = sqlx::query(
            "UPDATE job_queue SET status = $2, error = $3, finished_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(id));
        }
        Ok(())
    }

    async fn cancel_pending(&self, id: JobId) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE job_queue SET status = 'cancelled', finished_at = NOW() WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM job_queue WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueuedJob::try_from).transpose()
    }

    async fn active(&self, repository_uri: &str) -> QueueResult<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM job_queue
            WHERE repository_uri = $1 AND status IN ('pending', 'running')
            ORDER BY created_at ASC
            "#,
        )
        .bind(repository_uri)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    async fn list(&self) -> QueueResult<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM job_queue ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    async fn recover_interrupted(&self, error: &str) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE job_queue
            SET status = 'failed', error = $1, finished_at = NOW()
            WHERE status = 'running'
            RETURNING *
            "#,
        )
        .bind(error)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| QueuedJob::try_from(r).map(|q| q.job))
            .collect()
    }

    async fn prune(&self, before: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_queue
            WHERE status IN ('completed', 'failed', 'cancelled') AND finished_at <= $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
