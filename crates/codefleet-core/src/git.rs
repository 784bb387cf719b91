//! Git operations consumed by the workers.

use async_trait::async_trait;

use crate::Result;

/// Working-copy operations, addressed by repository uri.
///
/// Implementations must surface network failures as [`crate::Error::Network`]
/// and lock contention as [`crate::Error::Lock`] so callers can tell transient
/// failures apart.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Clone `url` into the working copy for `uri`. Returns the checked-out revision.
    async fn clone_repo(&self, url: &str, uri: &str) -> Result<String>;

    /// Fetch the origin and move the working copy to its head. Returns the new head.
    async fn fetch(&self, uri: &str) -> Result<String>;

    /// Current head revision of the working copy.
    async fn head(&self, uri: &str) -> Result<String>;

    /// Remove the working copy. Removing a missing copy succeeds.
    async fn remove(&self, uri: &str) -> Result<()>;
}
