//! Core domain types and traits for the codefleet repository fleet.
//!
//! This crate contains:
//! - Job identifiers, job kinds and queue statuses
//! - Repository records and the uri naming scheme
//! - Collaborator traits the job layer depends on (document store, git, indexers)

pub mod error;
pub mod git;
pub mod id;
pub mod indexer;
pub mod job;
pub mod repository;
pub mod store;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{Job, JobKind, JobOptions, JobPayload, JobStatus, LifecycleEvent};
pub use repository::{IndexFailure, RepoState, RepositoryRecord, RepositoryUri};
