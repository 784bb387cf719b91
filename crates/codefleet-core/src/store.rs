//! Document store abstraction.
//!
//! The job layer persists repository records and indexed documents through
//! this trait; backends live in `codefleet-db`.

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Field-equality filter over top-level document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub fields: Vec<(String, Value)>,
}

impl DocumentFilter {
    /// A filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// The filter as a JSON object, suitable for containment queries.
    pub fn to_object(&self) -> Value {
        Value::Object(self.fields.iter().cloned().collect())
    }
}

/// A keyed JSON document store partitioned into collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<()>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// Documents matching `filter`, in key order.
    async fn query(&self, collection: &str, filter: &DocumentFilter) -> Result<Vec<Value>>;

    /// Remove every document matching `filter`. Returns the number removed.
    async fn delete_matching(&self, collection: &str, filter: &DocumentFilter) -> Result<u64>;
}
