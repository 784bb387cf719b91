//! Job scheduling for codefleet.
//!
//! Repository work (clone, delete, index, update) flows through a [`JobQueue`]
//! with one consumer per job kind. Schedulers enqueue periodic work; the
//! [`CancellationService`] lets a delete stop everything else for a repository.
//! Queue state lives in memory or in PostgreSQL with SKIP LOCKED claiming.

pub mod cancellation;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod ticker;
pub mod worker;

pub use cancellation::{CancellationService, Registration};
pub use error::{QueueError, QueueResult};
pub use queue::{
    JobHandler, JobOutcome, JobQueue, MemoryQueueStore, PgQueueStore, QueueStore, QueuedJob,
    Subscription,
};
pub use scheduler::{CloneScheduler, IndexScheduler, Scheduler, Sweep, UpdateScheduler};
pub use ticker::Ticker;
pub use worker::{
    CloneWorker, DeleteWorker, IndexWorker, UpdateWorker, WorkError, Worker, WorkerContext,
    WorkerKind,
};
