//! Per-repository cancellation tokens.
//!
//! Every (repository, kind) registration gets its own token. Tokens for the
//! dependent kinds (clone, index, update) are children of a per-repository
//! root, so [`CancellationService::cancel_all`] reaches every one of them.

use codefleet_core::JobKind;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct RepoTokens {
    root: CancellationToken,
    jobs: HashMap<JobKind, (u64, CancellationToken)>,
}

impl RepoTokens {
    fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            jobs: HashMap::new(),
        }
    }
}

/// A live token registration, handed back to [`CancellationService::unregister`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub repository_uri: String,
    pub kind: JobKind,
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct CancellationService {
    repos: Mutex<HashMap<String, RepoTokens>>,
    next_generation: Mutex<u64>,
}

impl CancellationService {
    pub fn new() -> Self {
        Self::default()
    }

    fn repos(&self) -> MutexGuard<'_, HashMap<String, RepoTokens>> {
        self.repos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        let mut next = self
            .next_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        *next
    }

    /// Register a fresh token for (uri, kind).
    ///
    /// A token previously registered under the same key is cancelled and replaced.
    pub fn register(&self, repository_uri: &str, kind: JobKind) -> Registration {
        let generation = self.generation();
        let mut repos = self.repos();
        let entry = repos
            .entry(repository_uri.to_string())
            .or_insert_with(RepoTokens::new);

        let token = if kind.is_dependent() {
            entry.root.child_token()
        } else {
            CancellationToken::new()
        };
        if let Some((_, previous)) = entry.jobs.insert(kind, (generation, token.clone())) {
            previous.cancel();
        }
        debug!(repo = %repository_uri, %kind, generation, "Registered cancellation token");

        Registration {
            repository_uri: repository_uri.to_string(),
            kind,
            generation,
            token,
        }
    }

    /// Cancel the token for (uri, kind). Returns whether one was registered.
    pub fn cancel(&self, repository_uri: &str, kind: JobKind) -> bool {
        let repos = self.repos();
        match repos
            .get(repository_uri)
            .and_then(|entry| entry.jobs.get(&kind))
        {
            Some((_, token)) => {
                token.cancel();
                debug!(repo = %repository_uri, %kind, "Cancelled job token");
                true
            }
            None => false,
        }
    }

    /// Whether a live registration for (uri, kind) has been cancelled.
    pub fn is_cancelled(&self, repository_uri: &str, kind: JobKind) -> bool {
        self.repos()
            .get(repository_uri)
            .and_then(|entry| entry.jobs.get(&kind))
            .is_some_and(|(_, token)| token.is_cancelled())
    }

    /// Cancel every dependent token for `uri`. A no-op when nothing is registered.
    ///
    /// The root is replaced so that later registrations start uncancelled.
    pub fn cancel_all(&self, repository_uri: &str) {
        let mut repos = self.repos();
        if let Some(entry) = repos.get_mut(repository_uri) {
            entry.root.cancel();
            entry.root = CancellationToken::new();
            debug!(repo = %repository_uri, "Cancelled all job tokens");
        }
    }

    /// Drop a registration, unless a newer one has replaced it.
    pub fn unregister(&self, registration: &Registration) {
        let mut repos = self.repos();
        let Some(entry) = repos.get_mut(&registration.repository_uri) else {
            return;
        };
        if entry
            .jobs
            .get(&registration.kind)
            .is_some_and(|(generation, _)| *generation == registration.generation)
        {
            entry.jobs.remove(&registration.kind);
        }
        if entry.jobs.is_empty() {
            repos.remove(&registration.repository_uri);
        }
    }
}
