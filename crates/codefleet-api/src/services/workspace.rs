//! Workspace service: configured repositories and their init commands.

use crate::distributed::{DispatchFuture, RemoteClient, ServiceDefinition, ServiceError};
use crate::services::repository::{decode, encode};
use async_trait::async_trait;
use codefleet_config::RepoConfig;
use codefleet_core::git::GitOperations;
use codefleet_core::{Error, RepositoryUri};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const LIST: &str = "list";
pub const INIT: &str = "init";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRepo {
    pub uri: String,
    pub url: String,
    pub init: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub uri: String,
    pub revision: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    pub uri: String,
    pub revision: String,
    /// False when the workspace was already initialised at this revision.
    pub ran: bool,
}

#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn repo_configs(&self) -> Result<Vec<WorkspaceRepo>, ServiceError>;

    async fn init(&self, request: InitRequest) -> Result<InitReport, ServiceError>;
}

pub struct WorkspaceServiceDefinition;

impl ServiceDefinition for WorkspaceServiceDefinition {
    const NAME: &'static str = "workspace";
    type Handler = dyn WorkspaceService;

    fn forwarder(client: RemoteClient) -> Arc<dyn WorkspaceService> {
        Arc::new(WorkspaceForwarder { client })
    }

    fn dispatch(handler: Arc<dyn WorkspaceService>, method: String, body: Value) -> DispatchFuture {
        async move {
            match method.as_str() {
                LIST => encode(handler.repo_configs().await?),
                INIT => encode(handler.init(decode(body)?).await?),
                _ => Err(ServiceError::UnknownMethod {
                    service: Self::NAME.to_string(),
                    method,
                }),
            }
        }
        .boxed()
    }
}

/// Handler that runs init commands in this node's working copies.
pub struct LocalWorkspaceService {
    repos: Vec<WorkspaceRepo>,
    data_dir: PathBuf,
    git: Arc<dyn GitOperations>,
    /// Revision each workspace was last initialised at.
    initialised: Mutex<HashMap<String, String>>,
}

impl LocalWorkspaceService {
    pub fn new(repos: &[RepoConfig], data_dir: PathBuf, git: Arc<dyn GitOperations>) -> Self {
        let repos = repos
            .iter()
            .filter_map(|repo| match RepositoryUri::from_url(&repo.url) {
                Ok(uri) => Some(WorkspaceRepo {
                    uri: uri.to_string(),
                    url: repo.url.clone(),
                    init: repo.init.clone(),
                }),
                Err(e) => {
                    warn!(url = %repo.url, error = %e, "Skipping unparseable repo config");
                    None
                }
            })
            .collect();
        Self {
            repos,
            data_dir,
            git,
            initialised: Mutex::new(HashMap::new()),
        }
    }

    fn config(&self, uri: &str) -> Result<&WorkspaceRepo, ServiceError> {
        self.repos
            .iter()
            .find(|repo| repo.uri == uri)
            .ok_or_else(|| ServiceError::Core(Error::NotFound(format!("repo config for {uri}"))))
    }

    async fn run_init(&self, repo: &WorkspaceRepo) -> Result<(), ServiceError> {
        let Some((program, args)) = repo.init.split_first() else {
            return Ok(());
        };
        let output = Command::new(program)
            .args(args)
            .current_dir(self.data_dir.join(&repo.uri))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("{program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::Core(Error::ExecutionFailed(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceService for LocalWorkspaceService {
    async fn repo_configs(&self) -> Result<Vec<WorkspaceRepo>, ServiceError> {
        Ok(self.repos.clone())
    }

    async fn init(&self, request: InitRequest) -> Result<InitReport, ServiceError> {
        let repo = self.config(&request.uri)?;
        let head = self.git.head(&repo.uri).await?;
        if head != request.revision {
            return Err(ServiceError::Core(Error::Conflict(format!(
                "repository {} is checked out at {head}, not {}",
                repo.uri, request.revision
            ))));
        }

        // Held across the command so two inits of one workspace never overlap.
        let mut initialised = self.initialised.lock().await;
        let current = initialised.get(&repo.uri).is_some_and(|rev| *rev == head);
        let ran = if current && !request.force {
            false
        } else {
            self.run_init(repo).await?;
            initialised.insert(repo.uri.clone(), head.clone());
            info!(repo = %repo.uri, revision = %head, "Workspace initialised");
            true
        };

        Ok(InitReport {
            uri: repo.uri.clone(),
            revision: head,
            ran,
        })
    }
}

/// Handler that runs every call on the code node.
pub struct WorkspaceForwarder {
    client: RemoteClient,
}

#[async_trait]
impl WorkspaceService for WorkspaceForwarder {
    async fn repo_configs(&self) -> Result<Vec<WorkspaceRepo>, ServiceError> {
        self.client
            .call(WorkspaceServiceDefinition::NAME, LIST, &json!({}))
            .await
    }

    async fn init(&self, request: InitRequest) -> Result<InitReport, ServiceError> {
        self.client
            .call(WorkspaceServiceDefinition::NAME, INIT, &request)
            .await
    }
}
