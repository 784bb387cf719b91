//! Composition root: builds this node's collaborators for its role.

use crate::distributed::{LivenessToken, NodeRole, ServiceError, ServiceRegistry};
use crate::services::{
    LocalRepositoryService, LocalSetupService, LocalWorkspaceService,
    RepositoryServiceDefinition, SetupServiceDefinition, WorkspaceServiceDefinition,
};
use codefleet_config::ServerOptions;
use codefleet_core::git::GitOperations;
use codefleet_core::indexer::Indexer;
use codefleet_core::store::DocumentStore;
use codefleet_db::{
    DbError, MemoryDocumentStore, PgDocumentStore, RepositoryRecords, create_pool,
    run_migrations,
};
use codefleet_git::{FileInventoryIndexer, GitCli};
use codefleet_scheduler::scheduler::{CloneSweep, IndexSweep, UpdateSweep};
use codefleet_scheduler::{
    CancellationService, CloneScheduler, CloneWorker, DeleteWorker, IndexScheduler, IndexWorker,
    JobQueue, MemoryQueueStore, PgQueueStore, QueueError, QueueStore, UpdateScheduler,
    UpdateWorker, Worker, WorkerContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("service registry: {0}")]
    Service(#[from] ServiceError),

    #[error("data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Register the handlers backed by this node's own queue and records.
pub fn register_local_services(
    registry: &ServiceRegistry,
    queue: JobQueue,
    records: RepositoryRecords,
    workspace: LocalWorkspaceService,
) -> Result<(), ServiceError> {
    registry.register_handler::<RepositoryServiceDefinition>(Some(Arc::new(
        LocalRepositoryService::new(queue, records.clone()),
    )))?;
    registry.register_handler::<SetupServiceDefinition>(Some(Arc::new(LocalSetupService::new(
        registry.role().name(),
        records,
    ))))?;
    registry.register_handler::<WorkspaceServiceDefinition>(Some(Arc::new(workspace)))?;
    Ok(())
}

async fn open_stores(
    options: &ServerOptions,
) -> Result<(Arc<dyn DocumentStore>, Arc<dyn QueueStore>), StartupError> {
    match &options.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Using PostgreSQL stores");
            Ok((
                Arc::new(PgDocumentStore::new(pool.clone())),
                Arc::new(PgQueueStore::new(pool)),
            ))
        }
        None => {
            info!("No database configured, using in-memory stores");
            Ok((
                Arc::new(MemoryDocumentStore::new()),
                Arc::new(MemoryQueueStore::new()),
            ))
        }
    }
}

struct JobRuntime {
    queue: JobQueue,
    update: UpdateScheduler,
    index: IndexScheduler,
}

/// A started node: its registry and, unless it is a satellite, the queue,
/// workers and schedulers behind it.
pub struct Node {
    registry: Arc<ServiceRegistry>,
    runtime: Option<JobRuntime>,
}

impl Node {
    pub async fn start(
        options: &ServerOptions,
        role: NodeRole,
        token: LivenessToken,
    ) -> Result<Self, StartupError> {
        let registry = Arc::new(ServiceRegistry::new(
            role.clone(),
            options.listen.to_string(),
            token,
        ));

        if !role.runs_jobs() {
            registry.register_handler::<RepositoryServiceDefinition>(None)?;
            registry.register_handler::<SetupServiceDefinition>(None)?;
            registry.register_handler::<WorkspaceServiceDefinition>(None)?;
            info!(role = role.name(), "Service calls are forwarded to the code node");
            return Ok(Self {
                registry,
                runtime: None,
            });
        }

        tokio::fs::create_dir_all(&options.data_dir)
            .await
            .map_err(|source| StartupError::DataDir {
                path: options.data_dir.clone(),
                source,
            })?;

        let (documents, queue_store) = open_stores(options).await?;
        let records = RepositoryRecords::new(documents.clone());
        let queue = JobQueue::new(queue_store, &options.queue);
        queue.recover_interrupted().await?;

        let git: Arc<dyn GitOperations> = Arc::new(GitCli::new(options.data_dir.clone()));
        let ctx = WorkerContext {
            queue: queue.clone(),
            cancellation: Arc::new(CancellationService::new()),
            records: records.clone(),
            git: git.clone(),
        };
        let indexers: Vec<Arc<dyn Indexer>> = vec![Arc::new(FileInventoryIndexer::new(
            options.data_dir.clone(),
            documents,
        ))];

        Worker::new(CloneWorker, ctx.clone()).bind()?;
        Worker::new(
            DeleteWorker::new(indexers.clone(), options.worker.drain_timeout),
            ctx.clone(),
        )
        .bind()?;
        Worker::new(IndexWorker::new(indexers), ctx.clone()).bind()?;
        Worker::new(UpdateWorker, ctx).bind()?;

        let workspace = LocalWorkspaceService::new(&options.repos, options.data_dir.clone(), git);
        register_local_services(&registry, queue.clone(), records.clone(), workspace)?;

        let sched = &options.scheduler;
        let clone_sweep = CloneSweep::new(
            queue.clone(),
            records.clone(),
            options.repos.iter().map(|repo| repo.url.clone()).collect(),
        );
        let update_sweep =
            UpdateSweep::new(queue.clone(), records.clone(), sched.update_repo_frequency);
        let index_sweep = IndexSweep::new(queue.clone(), records, sched.index_repo_frequency);

        let (clone, update, index) = if sched.disable_scheduler {
            info!("Schedulers disabled");
            (
                CloneScheduler::disabled(clone_sweep),
                UpdateScheduler::disabled(update_sweep),
                IndexScheduler::disabled(index_sweep),
            )
        } else {
            let index = if sched.disable_index_scheduler {
                info!("Index scheduler disabled");
                IndexScheduler::disabled(index_sweep)
            } else {
                IndexScheduler::periodic(index_sweep, sched.index_frequency)
            };
            (
                CloneScheduler::on_demand(clone_sweep),
                UpdateScheduler::periodic(update_sweep, sched.update_frequency),
                index,
            )
        };

        let enqueued = clone.schedule().await;
        info!(enqueued, "Initial clone sweep finished");
        update.start();
        index.start();

        info!(role = role.name(), "Node started");
        Ok(Self {
            registry,
            runtime: Some(JobRuntime {
                queue,
                update,
                index,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn role(&self) -> &NodeRole {
        self.registry.role()
    }

    /// The job queue, when this node runs jobs.
    pub fn queue(&self) -> Option<&JobQueue> {
        self.runtime.as_ref().map(|runtime| &runtime.queue)
    }

    /// Stop the schedulers, then close the queue and wait for running jobs.
    pub async fn shutdown(self) {
        let Some(runtime) = self.runtime else {
            return;
        };
        runtime.update.stop().await;
        runtime.index.stop().await;
        if let Err(e) = runtime.queue.destroy().await {
            warn!(error = %e, "Queue shutdown failed");
        }
        info!("Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codefleet_core::JobKind;

    fn options(data_dir: &std::path::Path) -> ServerOptions {
        let mut options = ServerOptions::default();
        options.data_dir = data_dir.to_path_buf();
        options.scheduler.disable_scheduler = true;
        options
    }

    #[tokio::test]
    async fn test_single_node_binds_every_worker() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(
            &options(dir.path()),
            NodeRole::SingleNode,
            LivenessToken::generate(""),
        )
        .await
        .unwrap();

        let queue = node.queue().unwrap().clone();
        for kind in JobKind::ALL {
            assert!(queue.is_bound(kind), "{kind} has no consumer");
        }
        assert!(
            node.registry()
                .service_for::<RepositoryServiceDefinition>()
                .is_ok()
        );

        node.shutdown().await;
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_satellite_runs_no_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let role = NodeRole::Satellite {
            endpoint: crate::distributed::NodeEndpoint::remote(
                url::Url::parse("http://127.0.0.1:9").unwrap(),
            ),
            degraded: true,
        };
        let node = Node::start(&options(dir.path()), role, LivenessToken::generate(""))
            .await
            .unwrap();
        assert!(node.queue().is_none());
        assert!(
            node.registry()
                .service_for::<SetupServiceDefinition>()
                .is_ok()
        );
        assert!(
            node.registry()
                .service_for::<WorkspaceServiceDefinition>()
                .is_ok()
        );
        node.shutdown().await;
    }
}
