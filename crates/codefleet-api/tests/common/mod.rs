#![allow(dead_code)]

use async_trait::async_trait;
use codefleet_api::bootstrap::register_local_services;
use codefleet_api::distributed::{LivenessToken, NodeRole, ServiceRegistry};
use codefleet_api::services::LocalWorkspaceService;
use codefleet_api::{AppState, routes};
use codefleet_config::{QueueOptions, RepoConfig};
use codefleet_core::git::GitOperations;
use codefleet_db::{MemoryDocumentStore, RepositoryRecords};
use codefleet_scheduler::JobQueue;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

pub const SECRET: &str = "cluster-secret";
pub const URL: &str = "https://github.com/elastic/code.git";
pub const URI: &str = "github.com/elastic/code";
pub const HEAD: &str = "rev-1";

/// Working copies that are always checked out at [`HEAD`].
struct CheckedOut;

#[async_trait]
impl GitOperations for CheckedOut {
    async fn clone_repo(&self, _url: &str, _uri: &str) -> codefleet_core::Result<String> {
        Ok(HEAD.to_string())
    }

    async fn fetch(&self, _uri: &str) -> codefleet_core::Result<String> {
        Ok(HEAD.to_string())
    }

    async fn head(&self, _uri: &str) -> codefleet_core::Result<String> {
        Ok(HEAD.to_string())
    }

    async fn remove(&self, _uri: &str) -> codefleet_core::Result<()> {
        Ok(())
    }
}

/// A code node with in-memory stores and no workers bound, so jobs stay
/// pending where tests can see them.
pub struct CodeNode {
    pub state: AppState,
    pub token: LivenessToken,
    pub queue: JobQueue,
    pub records: RepositoryRecords,
    /// Data directory holding the working copy for [`URI`].
    pub data_dir: tempfile::TempDir,
}

pub fn code_node() -> CodeNode {
    let token = LivenessToken::generate(SECRET);
    let state = AppState::new(token.clone(), SECRET);
    let queue = JobQueue::in_memory(&QueueOptions::default());
    let records = RepositoryRecords::new(Arc::new(MemoryDocumentStore::new()));

    let registry = ServiceRegistry::new(NodeRole::CodeNode, "code-node", token.clone());
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(data_dir.path().join(URI)).unwrap();
    let repo = RepoConfig {
        url: URL.to_string(),
        init: vec!["sh".into(), "-c".into(), "echo ok > .initialised".into()],
    };
    let workspace =
        LocalWorkspaceService::new(&[repo], data_dir.path().to_path_buf(), Arc::new(CheckedOut));
    register_local_services(&registry, queue.clone(), records.clone(), workspace).unwrap();
    assert!(state.install(Arc::new(registry)));

    CodeNode {
        state,
        token,
        queue,
        records,
        data_dir,
    }
}

/// Serve `state` on an ephemeral local port and return its base address.
pub async fn serve(state: AppState) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, routes::router(state)).into_future());
    Url::parse(&format!("http://{addr}")).unwrap()
}
