//! Queue error types.

use codefleet_core::{JobId, JobKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("an active {kind} job already exists for {repository_uri}")]
    DuplicateActiveJob {
        repository_uri: String,
        kind: JobKind,
    },

    #[error("queue is closed")]
    QueueClosed,

    #[error("a consumer is already bound for {0} jobs")]
    KindAlreadyBound(JobKind),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("queue storage error: {0}")]
    Storage(String),

    #[error("invalid queue data: {0}")]
    InvalidData(String),
}

impl QueueError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::DuplicateActiveJob { .. })
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::InvalidData(err.to_string())
    }
}

impl From<QueueError> for codefleet_core::Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::DuplicateActiveJob { .. } => codefleet_core::Error::Conflict(err.to_string()),
            QueueError::JobNotFound(_) => codefleet_core::Error::NotFound(err.to_string()),
            QueueError::Storage(msg) => codefleet_core::Error::Storage(msg),
            other => codefleet_core::Error::Internal(other.to_string()),
        }
    }
}
