//! Repository records tracked by the job layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Lifecycle state of a repository on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Uncloned,
    Cloning,
    Cloned,
    Indexing,
    Indexed,
    Deleting,
    Error,
}

impl RepoState {
    /// Whether a working copy is known to be present.
    pub fn has_clone(&self) -> bool {
        matches!(
            self,
            RepoState::Cloned | RepoState::Indexing | RepoState::Indexed
        )
    }
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepoState::Uncloned => "uncloned",
            RepoState::Cloning => "cloning",
            RepoState::Cloned => "cloned",
            RepoState::Indexing => "indexing",
            RepoState::Indexed => "indexed",
            RepoState::Deleting => "deleting",
            RepoState::Error => "error",
        };
        f.write_str(s)
    }
}

/// A failure reported by a single indexer during the last index run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub indexer: String,
    pub message: String,
}

/// Persisted per-repository state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub uri: String,
    /// Origin clone URL.
    pub url: String,
    pub state: RepoState,
    pub revision_cloned: Option<String>,
    pub revision_indexed: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when the last failure was transient and a scheduler may retry.
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub index_failures: Vec<IndexFailure>,
}

impl RepositoryRecord {
    pub fn new(uri: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            url: url.into(),
            state: RepoState::Uncloned,
            revision_cloned: None,
            revision_indexed: None,
            last_updated_at: None,
            last_indexed_at: None,
            last_error: None,
            retryable: false,
            index_failures: Vec::new(),
        }
    }

    /// Record a failed job against this repository.
    pub fn fail(&mut self, message: impl Into<String>, retryable: bool) {
        self.state = RepoState::Error;
        self.last_error = Some(message.into());
        self.retryable = retryable;
    }

    /// Whether this repository still lacks a working copy and may be cloned.
    ///
    /// Covers interrupted clones (`Cloning`) and failed ones (`Error`).
    pub fn needs_clone(&self) -> bool {
        self.revision_cloned.is_none()
            && !self.state.has_clone()
            && self.state != RepoState::Deleting
    }

    /// The settled state implied by the revisions on record.
    pub fn settled_state(&self) -> RepoState {
        if self.revision_indexed.is_some() {
            RepoState::Indexed
        } else if self.revision_cloned.is_some() {
            RepoState::Cloned
        } else {
            RepoState::Uncloned
        }
    }
}

/// Normalized repository identifier, e.g. `github.com/elastic/code`.
///
/// The uri doubles as the relative path of the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryUri(String);

impl RepositoryUri {
    /// Derive the uri from a clone URL.
    ///
    /// Accepts `scheme://[user@]host/path[.git]` and scp-like `user@host:path[.git]`.
    pub fn from_url(clone_url: &str) -> Result<Self> {
        let trimmed = clone_url.trim();
        let (host, path) = match Url::parse(trimmed) {
            Ok(url) if url.has_host() => {
                let host = url.host_str().unwrap_or_default().to_lowercase();
                (host, url.path().to_string())
            }
            _ => Self::split_scp_like(trimmed)
                .ok_or_else(|| Error::InvalidInput(format!("invalid repository url: {trimmed}")))?,
        };

        Self::check_host(&host, trimmed)?;

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(Error::InvalidInput(format!(
                "invalid repository path in url: {trimmed}"
            )));
        }

        Ok(Self(format!("{}/{}", host, segments.join("/"))))
    }

    /// The host becomes the first path component of the working copy, so it
    /// must be a real host name or address.
    fn check_host(host: &str, clone_url: &str) -> Result<()> {
        let invalid = || Error::InvalidInput(format!("invalid host in repository url: {clone_url}"));
        if host.is_empty() || host.split('.').any(str::is_empty) {
            return Err(invalid());
        }
        if !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']' | ':'))
        {
            return Err(invalid());
        }
        url::Host::parse(host).map_err(|_| invalid())?;
        Ok(())
    }

    fn split_scp_like(s: &str) -> Option<(String, String)> {
        let (authority, path) = s.split_once(':')?;
        let host = authority.rsplit('@').next()?;
        if host.is_empty() || host.contains('/') {
            return None;
        }
        Some((host.to_lowercase(), path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RepositoryUri> for String {
    fn from(uri: RepositoryUri) -> Self {
        uri.0
    }
}
