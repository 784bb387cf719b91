//! Typed access to repository records.

use std::sync::Arc;

use codefleet_core::store::{DocumentFilter, DocumentStore};
use codefleet_core::{Error, RepoState, RepositoryRecord, Result};

use crate::DbError;

pub const REPOSITORY_COLLECTION: &str = "repositories";

/// Repository record store layered over a [`DocumentStore`].
#[derive(Clone)]
pub struct RepositoryRecords {
    store: Arc<dyn DocumentStore>,
}

impl RepositoryRecords {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The underlying document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn get(&self, uri: &str) -> Result<Option<RepositoryRecord>> {
        match self.store.get(REPOSITORY_COLLECTION, uri).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc).map_err(DbError::from)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, record: &RepositoryRecord) -> Result<()> {
        let doc = serde_json::to_value(record).map_err(DbError::from)?;
        self.store.put(REPOSITORY_COLLECTION, &record.uri, doc).await
    }

    pub async fn delete(&self, uri: &str) -> Result<bool> {
        self.store.delete(REPOSITORY_COLLECTION, uri).await
    }

    /// All records, ordered by uri.
    pub async fn list(&self) -> Result<Vec<RepositoryRecord>> {
        let docs = self
            .store
            .query(REPOSITORY_COLLECTION, &DocumentFilter::all())
            .await?;
        let mut records = docs
            .into_iter()
            .map(serde_json::from_value::<RepositoryRecord>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DbError::from)?;
        records.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(records)
    }

    /// Move a record to `state`, returning the updated record.
    pub async fn transition(&self, uri: &str, state: RepoState) -> Result<RepositoryRecord> {
        let mut record = self
            .get(uri)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {uri}")))?;
        tracing::debug!(uri, from = %record.state, to = %state, "repository state transition");
        record.state = state;
        self.save(&record).await?;
        Ok(record)
    }
}
