//! In-process document store.

use async_trait::async_trait;
use codefleet_core::Result;
use codefleet_core::store::{DocumentFilter, DocumentStore};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Document store kept in memory, used for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let docs = self.docs.read().await;
        Ok(docs.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<()> {
        let mut docs = self.docs.write().await;
        docs.entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let mut docs = self.docs.write().await;
        Ok(docs
            .get_mut(collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> Result<Vec<Value>> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(collection)
            .map(|c| c.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_matching(&self, collection: &str, filter: &DocumentFilter) -> Result<u64> {
        let mut docs = self.docs.write().await;
        let Some(c) = docs.get_mut(collection) else {
            return Ok(0);
        };
        let before = c.len();
        c.retain(|_, doc| !filter.matches(doc));
        Ok((before - c.len()) as u64)
    }
}
