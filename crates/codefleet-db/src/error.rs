//! Storage errors for the document backends.

use codefleet_core::Error as CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored document does not match the expected shape.
    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Document(e) => CoreError::Internal(e.to_string()),
            other => CoreError::Storage(other.to_string()),
        }
    }
}
