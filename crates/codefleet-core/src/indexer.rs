//! Pluggable indexer strategies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Outcome of one indexer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub success: bool,
    /// Items that could not be indexed without failing the run.
    pub partial_failures: Vec<String>,
}

impl IndexReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            partial_failures: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Indexer: Send + Sync {
    fn name(&self) -> &str;

    /// Index the working copy of `uri` at `revision`.
    async fn run(&self, uri: &str, revision: &str) -> Result<IndexReport>;

    /// Drop everything this indexer stored for `uri`.
    async fn clear(&self, uri: &str) -> Result<()>;
}
