pub mod repository;
pub mod setup;
pub mod workspace;

pub use repository::{
    ActiveJob, CloneRequest, IndexRequest, JobAccepted, LocalRepositoryService,
    RepositoryForwarder, RepositoryRequest, RepositoryService, RepositoryServiceDefinition,
    RepositoryStatus,
};
pub use setup::{LocalSetupService, SetupForwarder, SetupService, SetupServiceDefinition, SetupStatus};
pub use workspace::{
    InitReport, InitRequest, LocalWorkspaceService, WorkspaceForwarder, WorkspaceRepo,
    WorkspaceService, WorkspaceServiceDefinition,
};
