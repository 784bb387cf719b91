//! Git working copies and the file inventory indexer.

pub mod cli;
pub mod error;
pub mod inventory;

pub use cli::{GitCli, redact_url};
pub use error::GitError;
pub use inventory::{FILES_COLLECTION, FileInventoryIndexer, detect_language};
