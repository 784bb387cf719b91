//! Repository service: clone, delete, index and status.

use crate::distributed::{DispatchFuture, RemoteClient, ServiceDefinition, ServiceError};
use async_trait::async_trait;
use codefleet_core::{
    Error, Job, JobId, JobKind, JobStatus, RepoState, RepositoryRecord, RepositoryUri,
};
use codefleet_db::RepositoryRecords;
use codefleet_scheduler::JobQueue;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const CLONE: &str = "clone";
pub const DELETE: &str = "delete";
pub const INDEX: &str = "index";
pub const STATUS: &str = "status";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub uri: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub reindex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAccepted {
    pub uri: String,
    pub job_id: JobId,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub record: RepositoryRecord,
    pub jobs: Vec<ActiveJob>,
}

#[async_trait]
pub trait RepositoryService: Send + Sync {
    async fn clone_repository(&self, request: CloneRequest) -> Result<JobAccepted, ServiceError>;

    async fn delete_repository(
        &self,
        request: RepositoryRequest,
    ) -> Result<JobAccepted, ServiceError>;

    async fn index_repository(&self, request: IndexRequest) -> Result<JobAccepted, ServiceError>;

    async fn status(&self, request: RepositoryRequest) -> Result<RepositoryStatus, ServiceError>;
}

pub struct RepositoryServiceDefinition;

pub(crate) fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ServiceError> {
    serde_json::from_value(body).map_err(|e| ServiceError::InvalidRequest(e.to_string()))
}

pub(crate) fn encode<T: Serialize>(reply: T) -> Result<Value, ServiceError> {
    serde_json::to_value(reply).map_err(|e| ServiceError::Core(Error::Internal(e.to_string())))
}

impl ServiceDefinition for RepositoryServiceDefinition {
    const NAME: &'static str = "repository";
    type Handler = dyn RepositoryService;

    fn forwarder(client: RemoteClient) -> Arc<dyn RepositoryService> {
        Arc::new(RepositoryForwarder { client })
    }

    fn dispatch(handler: Arc<dyn RepositoryService>, method: String, body: Value) -> DispatchFuture {
        async move {
            match method.as_str() {
                CLONE => encode(handler.clone_repository(decode(body)?).await?),
                DELETE => encode(handler.delete_repository(decode(body)?).await?),
                INDEX => encode(handler.index_repository(decode(body)?).await?),
                STATUS => encode(handler.status(decode(body)?).await?),
                _ => Err(ServiceError::UnknownMethod {
                    service: Self::NAME.to_string(),
                    method,
                }),
            }
        }
        .boxed()
    }
}

/// Handler backed by this node's queue and records.
pub struct LocalRepositoryService {
    queue: JobQueue,
    records: RepositoryRecords,
}

impl LocalRepositoryService {
    pub fn new(queue: JobQueue, records: RepositoryRecords) -> Self {
        Self { queue, records }
    }

    async fn record(&self, uri: &str) -> Result<RepositoryRecord, ServiceError> {
        self.records
            .get(uri)
            .await?
            .ok_or_else(|| ServiceError::Core(Error::NotFound(format!("repository {uri}"))))
    }
}

fn accepted(job: &Job, job_id: JobId) -> JobAccepted {
    JobAccepted {
        uri: job.repository_uri.clone(),
        job_id,
        kind: job.kind,
    }
}

#[async_trait]
impl RepositoryService for LocalRepositoryService {
    async fn clone_repository(&self, request: CloneRequest) -> Result<JobAccepted, ServiceError> {
        let uri = RepositoryUri::from_url(&request.url)?;
        if self.records.get(uri.as_str()).await?.is_none() {
            self.records
                .save(&RepositoryRecord::new(uri.as_str(), &request.url))
                .await?;
        }

        let job = Job::clone_repo(uri.as_str(), &request.url);
        let id = self.queue.enqueue(job.clone()).await?;
        info!(repo = %uri, job_id = %id, "Clone requested");
        Ok(accepted(&job, id))
    }

    async fn delete_repository(
        &self,
        request: RepositoryRequest,
    ) -> Result<JobAccepted, ServiceError> {
        self.record(&request.uri).await?;
        let job = Job::delete(&request.uri);
        let id = self.queue.enqueue(job.clone()).await?;
        info!(repo = %request.uri, job_id = %id, "Delete requested");
        Ok(accepted(&job, id))
    }

    async fn index_repository(&self, request: IndexRequest) -> Result<JobAccepted, ServiceError> {
        let record = self.record(&request.uri).await?;
        if record.state == RepoState::Deleting {
            return Err(ServiceError::Core(Error::Conflict(format!(
                "repository {} is being deleted",
                request.uri
            ))));
        }
        let Some(cloned) = record.revision_cloned.as_deref() else {
            return Err(ServiceError::Core(Error::Conflict(format!(
                "repository {} has not been cloned",
                request.uri
            ))));
        };
        if let Some(revision) = request.revision.as_deref().filter(|r| *r != cloned) {
            return Err(ServiceError::Core(Error::Conflict(format!(
                "repository {} is checked out at {cloned}, not {revision}",
                request.uri
            ))));
        }

        let job = Job::index(&request.uri, request.revision, request.reindex);
        let id = self.queue.enqueue_superseding(job.clone()).await?;
        info!(repo = %request.uri, job_id = %id, "Index requested");
        Ok(accepted(&job, id))
    }

    async fn status(&self, request: RepositoryRequest) -> Result<RepositoryStatus, ServiceError> {
        let record = self.record(&request.uri).await?;
        let jobs = self
            .queue
            .active(&request.uri)
            .await?
            .into_iter()
            .map(|queued| ActiveJob {
                id: queued.job.id,
                kind: queued.job.kind,
                status: queued.status,
            })
            .collect();
        Ok(RepositoryStatus { record, jobs })
    }
}

/// Handler that runs every call on the code node.
pub struct RepositoryForwarder {
    client: RemoteClient,
}

#[async_trait]
impl RepositoryService for RepositoryForwarder {
    async fn clone_repository(&self, request: CloneRequest) -> Result<JobAccepted, ServiceError> {
        self.client
            .call(RepositoryServiceDefinition::NAME, CLONE, &request)
            .await
    }

    async fn delete_repository(
        &self,
        request: RepositoryRequest,
    ) -> Result<JobAccepted, ServiceError> {
        self.client
            .call(RepositoryServiceDefinition::NAME, DELETE, &request)
            .await
    }

    async fn index_repository(&self, request: IndexRequest) -> Result<JobAccepted, ServiceError> {
        self.client
            .call(RepositoryServiceDefinition::NAME, INDEX, &request)
            .await
    }

    async fn status(&self, request: RepositoryRequest) -> Result<RepositoryStatus, ServiceError> {
        self.client
            .call(RepositoryServiceDefinition::NAME, STATUS, &request)
            .await
    }
}
