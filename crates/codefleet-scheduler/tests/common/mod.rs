#![allow(dead_code)]

use async_trait::async_trait;
use codefleet_config::QueueOptions;
use codefleet_core::git::GitOperations;
use codefleet_core::indexer::{IndexReport, Indexer};
use codefleet_core::{Error, JobId, JobStatus, RepoState, Result};
use codefleet_db::{MemoryDocumentStore, RepositoryRecords};
use codefleet_scheduler::{CancellationService, JobQueue, WorkerContext};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const URL: &str = "https://github.com/elastic/code.git";
pub const URI: &str = "github.com/elastic/code";

/// Git double that records which working copies exist.
#[derive(Default)]
pub struct FakeGit {
    pub copies: Mutex<HashSet<String>>,
    pub head: Mutex<String>,
    pub fail_clone: AtomicBool,
    /// Number of upcoming clones that fail before clones succeed again.
    pub failing_clones: AtomicUsize,
    pub panic_clone: AtomicBool,
    pub clones: AtomicUsize,
}

impl FakeGit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            head: Mutex::new("rev-1".to_string()),
            ..Default::default()
        })
    }

    pub fn set_head(&self, revision: &str) {
        *self.head.lock().unwrap() = revision.to_string();
    }

    pub fn has_copy(&self, uri: &str) -> bool {
        self.copies.lock().unwrap().contains(uri)
    }
}

#[async_trait]
impl GitOperations for FakeGit {
    async fn clone_repo(&self, _url: &str, uri: &str) -> Result<String> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        if self.panic_clone.load(Ordering::SeqCst) {
            panic!("clone of {uri} exploded");
        }
        let failing = self
            .failing_clones
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.fail_clone.load(Ordering::SeqCst) {
            return Err(Error::Network("could not resolve host".into()));
        }
        self.copies.lock().unwrap().insert(uri.to_string());
        Ok(self.head.lock().unwrap().clone())
    }

    async fn fetch(&self, uri: &str) -> Result<String> {
        if !self.has_copy(uri) {
            return Err(Error::NotFound(uri.to_string()));
        }
        Ok(self.head.lock().unwrap().clone())
    }

    async fn head(&self, uri: &str) -> Result<String> {
        self.fetch(uri).await
    }

    async fn remove(&self, uri: &str) -> Result<()> {
        self.copies.lock().unwrap().remove(uri);
        Ok(())
    }
}

/// Indexer double. When `block` is set, runs wait until dropped.
pub struct FakeIndexer {
    pub name: &'static str,
    pub block: AtomicBool,
    pub fail: AtomicBool,
    pub started: AtomicUsize,
    pub runs: AtomicUsize,
    pub cleared: Mutex<Vec<String>>,
}

impl FakeIndexer {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            block: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            cleared: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Indexer for FakeIndexer {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _uri: &str, _revision: &str) -> Result<IndexReport> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.block.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ExecutionFailed(format!("{} broke", self.name)));
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(IndexReport::ok())
    }

    async fn clear(&self, uri: &str) -> Result<()> {
        self.cleared.lock().unwrap().push(uri.to_string());
        Ok(())
    }
}

pub fn queue_options() -> QueueOptions {
    QueueOptions {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
        ..QueueOptions::default()
    }
}

pub struct Harness {
    pub ctx: WorkerContext,
    pub git: Arc<FakeGit>,
}

pub fn harness() -> Harness {
    let git = FakeGit::new();
    let ctx = WorkerContext {
        queue: JobQueue::in_memory(&queue_options()),
        cancellation: Arc::new(CancellationService::new()),
        records: RepositoryRecords::new(Arc::new(MemoryDocumentStore::new())),
        git: git.clone(),
    };
    Harness { ctx, git }
}

pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_job(queue: &JobQueue, id: JobId, status: JobStatus) {
    eventually(&format!("job {id} to be {status}"), || async move {
        queue.get(id).await.unwrap().map(|q| q.status) == Some(status)
    })
    .await;
}

pub async fn wait_for_state(records: &RepositoryRecords, uri: &str, state: RepoState) {
    eventually(&format!("{uri} to be {state}"), || async move {
        records.get(uri).await.unwrap().map(|r| r.state) == Some(state)
    })
    .await;
}
