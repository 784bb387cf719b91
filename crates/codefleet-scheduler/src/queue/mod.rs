//! The job queue.
//!
//! One polling consumer per job kind claims jobs from a [`QueueStore`] and
//! hands them to the bound [`JobHandler`]. Consumers wake on enqueue or on the
//! poll interval. Cyclic jobs are redelivered by a [`Ticker`] until cancelled.

pub mod postgres;
pub mod store;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use codefleet_config::QueueOptions;
use codefleet_core::{Job, JobId, JobKind, JobStatus, LifecycleEvent};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::ticker::Ticker;

pub use postgres::PgQueueStore;
pub use store::{MemoryQueueStore, QueueStore, QueuedJob};

const EVENT_CAPACITY: usize = 256;
const INTERRUPTED: &str = "interrupted by a restart";

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Executes claimed jobs of one kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run `job`. `token` is cancelled when the job is cancelled through the
    /// queue, times out, or the queue is destroyed.
    async fn handle(&self, job: Job, token: CancellationToken) -> JobOutcome;
}

struct Consumer {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct QueueInner {
    store: Arc<dyn QueueStore>,
    notifiers: HashMap<JobKind, Notify>,
    consumers: Mutex<HashMap<JobKind, Consumer>>,
    running: Mutex<HashMap<JobId, CancellationToken>>,
    cyclic: Mutex<HashMap<CycleKey, Cycle>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    events: broadcast::Sender<LifecycleEvent>,
    poll_interval: Duration,
    timeout: Duration,
    retention: Duration,
}

/// Cyclic jobs are keyed by what they redeliver, not by a single run.
type CycleKey = (String, JobKind);

struct Cycle {
    origin: JobId,
    ticker: Ticker,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bound consumer. Dropping it leaves the consumer running; call
/// [`Subscription::unbind`] to stop it.
pub struct Subscription {
    kind: JobKind,
    queue: JobQueue,
}

impl Subscription {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Stop the consumer, waiting for its current job.
    pub async fn unbind(self) {
        self.queue.unbind(self.kind).await;
    }
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn QueueStore>, options: &QueueOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let notifiers = JobKind::ALL
            .iter()
            .map(|kind| (*kind, Notify::new()))
            .collect();
        Self {
            inner: Arc::new(QueueInner {
                store,
                notifiers,
                consumers: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                cyclic: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                events,
                poll_interval: options.poll_interval,
                timeout: options.timeout,
                retention: options.retention,
            }),
        }
    }

    /// A queue over a fresh in-memory store.
    pub fn in_memory(options: &QueueOptions) -> Self {
        Self::new(Arc::new(MemoryQueueStore::new()), options)
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::QueueClosed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Fail every job a previous process left running. Call before binding
    /// consumers. Returns how many jobs were recovered.
    pub async fn recover_interrupted(&self) -> QueueResult<usize> {
        self.ensure_open()?;
        let interrupted = self.inner.store.recover_interrupted(INTERRUPTED).await?;
        for job in &interrupted {
            self.inner.emit(LifecycleEvent::Failed {
                job_id: job.id,
                kind: job.kind,
                repository_uri: job.repository_uri.clone(),
                error: INTERRUPTED.to_string(),
            });
        }
        if !interrupted.is_empty() {
            info!(recovered = interrupted.len(), "Recovered interrupted jobs");
        }
        Ok(interrupted.len())
    }

    /// Lifecycle events for every job handled by this queue.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Enqueue a job.
    ///
    /// Fails with [`QueueError::DuplicateActiveJob`] if a pending or running
    /// job exists for the same repository and kind.
    pub async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        self.push(job, false).await
    }

    /// Enqueue a job, replacing a pending job for the same repository and kind.
    ///
    /// A running job is not replaced and still yields
    /// [`QueueError::DuplicateActiveJob`].
    pub async fn enqueue_superseding(&self, job: Job) -> QueueResult<JobId> {
        self.push(job, true).await
    }

    async fn push(&self, job: Job, supersede: bool) -> QueueResult<JobId> {
        let id = self.inner.insert(&job, supersede).await?;
        if let Some(interval) = job.options.interval() {
            self.start_cycle(job, interval).await;
        }
        Ok(id)
    }

    async fn start_cycle(&self, origin: Job, interval: Duration) {
        let ticker = Ticker::new(
            format!("cyclic-{}-{}", origin.kind, origin.repository_uri),
            interval,
        );
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let job = origin.clone();
        ticker.start(move || {
            let weak = weak.clone();
            let next = job.redeliver();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.insert(&next, false).await {
                    Ok(_) => {}
                    Err(e) if e.is_duplicate() => {
                        debug!(repo = %next.repository_uri, kind = %next.kind, "Previous cyclic run still active")
                    }
                    Err(QueueError::QueueClosed) => {}
                    Err(e) => warn!(error = %e, "Failed to redeliver cyclic job"),
                }
            }
            .boxed()
        });
        let key = (origin.repository_uri.clone(), origin.kind);
        let replaced = locked(&self.inner.cyclic).insert(
            key,
            Cycle {
                origin: origin.id,
                ticker,
            },
        );
        if let Some(previous) = replaced {
            previous.ticker.stop().await;
            debug!(job_id = %previous.origin, replaced_by = %origin.id, "Replaced cyclic job");
        }
    }

    /// Stop the cycle that `id` belongs to, if any.
    async fn stop_cycle(&self, id: JobId, queued: Option<&QueuedJob>) -> bool {
        let cycle = {
            let mut cyclic = locked(&self.inner.cyclic);
            let key = match queued {
                Some(q) if q.job.options.interval().is_some() => {
                    Some((q.job.repository_uri.clone(), q.job.kind))
                }
                Some(_) => None,
                None => cyclic
                    .iter()
                    .find(|(_, cycle)| cycle.origin == id)
                    .map(|(key, _)| key.clone()),
            };
            key.and_then(|key| cyclic.remove(&key))
        };
        match cycle {
            Some(cycle) => {
                cycle.ticker.stop().await;
                debug!(job_id = %id, origin = %cycle.origin, "Stopped cyclic redelivery");
                true
            }
            None => false,
        }
    }

    /// Bind the consumer for `kind`. One consumer per kind.
    pub fn bind(&self, kind: JobKind, handler: Arc<dyn JobHandler>) -> QueueResult<Subscription> {
        self.ensure_open()?;
        let mut consumers = locked(&self.inner.consumers);
        if consumers.contains_key(&kind) {
            return Err(QueueError::KindAlreadyBound(kind));
        }

        let stop = self.inner.shutdown.child_token();
        let handle = tokio::spawn(QueueInner::consume(
            self.inner.clone(),
            kind,
            handler,
            stop.clone(),
        ));
        consumers.insert(kind, Consumer { stop, handle });
        info!(%kind, "Bound job consumer");

        Ok(Subscription {
            kind,
            queue: self.clone(),
        })
    }

    pub fn is_bound(&self, kind: JobKind) -> bool {
        locked(&self.inner.consumers).contains_key(&kind)
    }

    async fn unbind(&self, kind: JobKind) {
        let consumer = locked(&self.inner.consumers).remove(&kind);
        if let Some(consumer) = consumer {
            consumer.stop.cancel();
            if let Err(e) = consumer.handle.await {
                warn!(%kind, error = %e, "Job consumer ended abnormally");
            }
            info!(%kind, "Unbound job consumer");
        }
    }

    /// Cancel a job.
    ///
    /// A pending job becomes cancelled, a running job has its token signalled,
    /// and cyclic redelivery of the job stops. Any run of a cyclic job stops
    /// the whole cycle.
    pub async fn cancel(&self, id: JobId) -> QueueResult<()> {
        self.ensure_open()?;
        let queued = self.inner.store.get(id).await?;
        let stopped = self.stop_cycle(id, queued.as_ref()).await;
        let Some(queued) = queued else {
            // The origin of a cycle may already have been pruned.
            return if stopped {
                Ok(())
            } else {
                Err(QueueError::JobNotFound(id))
            };
        };
        match queued.status {
            JobStatus::Pending => {
                if self.inner.store.cancel_pending(id).await? {
                    self.inner.emit(cancelled_event(&queued.job));
                }
            }
            JobStatus::Running => {
                if let Some(token) = locked(&self.inner.running).get(&id) {
                    token.cancel();
                    info!(job_id = %id, "Signalled running job to cancel");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Cancel the pending jobs of `kinds` for a repository. Returns the cancelled ids.
    pub async fn cancel_pending_for(
        &self,
        repository_uri: &str,
        kinds: &[JobKind],
    ) -> QueueResult<Vec<JobId>> {
        self.ensure_open()?;
        let mut cancelled = Vec::new();
        for queued in self.inner.store.active(repository_uri).await? {
            if queued.status != JobStatus::Pending || !kinds.contains(&queued.job.kind) {
                continue;
            }
            if self.inner.store.cancel_pending(queued.job.id).await? {
                self.inner.emit(cancelled_event(&queued.job));
                cancelled.push(queued.job.id);
            }
        }
        Ok(cancelled)
    }

    pub async fn get(&self, id: JobId) -> QueueResult<Option<QueuedJob>> {
        self.ensure_open()?;
        self.inner.store.get(id).await
    }

    /// Pending and running jobs for a repository.
    pub async fn active(&self, repository_uri: &str) -> QueueResult<Vec<QueuedJob>> {
        self.ensure_open()?;
        self.inner.store.active(repository_uri).await
    }

    pub async fn list(&self) -> QueueResult<Vec<QueuedJob>> {
        self.ensure_open()?;
        self.inner.store.list().await
    }

    /// Stop every consumer and timer. Afterwards every call fails with
    /// [`QueueError::QueueClosed`].
    pub async fn destroy(&self) -> QueueResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(QueueError::QueueClosed);
        }
        info!("Destroying job queue");
        self.inner.shutdown.cancel();

        let cycles: Vec<Cycle> = locked(&self.inner.cyclic).drain().map(|(_, c)| c).collect();
        for cycle in cycles {
            cycle.ticker.stop().await;
        }

        let consumers: Vec<(JobKind, Consumer)> = locked(&self.inner.consumers).drain().collect();
        for (kind, consumer) in consumers {
            if let Err(e) = consumer.handle.await {
                warn!(%kind, error = %e, "Job consumer ended abnormally");
            }
        }
        Ok(())
    }
}

fn cancelled_event(job: &Job) -> LifecycleEvent {
    LifecycleEvent::Cancelled {
        job_id: job.id,
        kind: job.kind,
        repository_uri: job.repository_uri.clone(),
    }
}

impl QueueInner {
    async fn insert(&self, job: &Job, supersede: bool) -> QueueResult<JobId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::QueueClosed);
        }
        let superseded = self.store.insert(job, supersede).await?;
        if let Some(old) = superseded {
            info!(job_id = %old, replaced_by = %job.id, "Superseded pending job");
            self.emit(LifecycleEvent::Cancelled {
                job_id: old,
                kind: job.kind,
                repository_uri: job.repository_uri.clone(),
            });
        }
        self.emit(LifecycleEvent::Enqueued {
            job_id: job.id,
            kind: job.kind,
            repository_uri: job.repository_uri.clone(),
        });
        if let Some(notify) = self.notifiers.get(&job.kind) {
            notify.notify_one();
        }
        Ok(job.id)
    }

    fn emit(&self, event: LifecycleEvent) {
        match &event {
            LifecycleEvent::Enqueued { job_id, kind, repository_uri } => {
                debug!(%job_id, %kind, repo = %repository_uri, "Job enqueued")
            }
            LifecycleEvent::Started { job_id, kind, repository_uri } => {
                info!(%job_id, %kind, repo = %repository_uri, "Job started")
            }
            LifecycleEvent::Completed { job_id, kind, repository_uri } => {
                info!(%job_id, %kind, repo = %repository_uri, "Job completed")
            }
            LifecycleEvent::Failed { job_id, kind, repository_uri, error } => {
                warn!(%job_id, %kind, repo = %repository_uri, %error, "Job failed")
            }
            LifecycleEvent::Cancelled { job_id, kind, repository_uri } => {
                info!(%job_id, %kind, repo = %repository_uri, "Job cancelled")
            }
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn consume(
        self: Arc<Self>,
        kind: JobKind,
        handler: Arc<dyn JobHandler>,
        stop: CancellationToken,
    ) {
        let Some(notify) = self.notifiers.get(&kind) else {
            error!(%kind, "No notifier for job kind");
            return;
        };
        debug!(%kind, "Job consumer started");

        while !stop.is_cancelled() {
            match self.store.claim(kind).await {
                Ok(Some(job)) => self.run_job(job, &handler).await,
                Ok(None) => {
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(%kind, error = %e, "Failed to claim job");
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        debug!(%kind, "Job consumer stopped");
    }

    async fn run_job(&self, job: Job, handler: &Arc<dyn JobHandler>) {
        let token = self.shutdown.child_token();
        locked(&self.running).insert(job.id, token.clone());
        self.emit(LifecycleEvent::Started {
            job_id: job.id,
            kind: job.kind,
            repository_uri: job.repository_uri.clone(),
        });

        // Handlers run in their own task so a panic is recorded as a failure.
        let mut task = {
            let handler = handler.clone();
            let job = job.clone();
            let token = token.clone();
            tokio::spawn(async move { handler.handle(job, token).await })
        };

        let mut timed_out = false;
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep(self.timeout) => {
                warn!(job_id = %job.id, timeout = ?self.timeout, "Job exceeded queue timeout");
                timed_out = true;
                token.cancel();
                task.await
            }
        };
        locked(&self.running).remove(&job.id);

        let outcome = match joined {
            Ok(JobOutcome::Cancelled) if timed_out => {
                JobOutcome::Failed(format!("timed out after {:?}", self.timeout))
            }
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed(format!("job panicked: {e}")),
        };

        let (status, error, event) = match outcome {
            JobOutcome::Completed => (
                JobStatus::Completed,
                None,
                LifecycleEvent::Completed {
                    job_id: job.id,
                    kind: job.kind,
                    repository_uri: job.repository_uri.clone(),
                },
            ),
            JobOutcome::Failed(message) => (
                JobStatus::Failed,
                Some(message.clone()),
                LifecycleEvent::Failed {
                    job_id: job.id,
                    kind: job.kind,
                    repository_uri: job.repository_uri.clone(),
                    error: message,
                },
            ),
            JobOutcome::Cancelled => (JobStatus::Cancelled, None, cancelled_event(&job)),
        };

        if let Err(e) = self.store.finish(job.id, status, error.as_deref()).await {
            error!(job_id = %job.id, error = %e, "Failed to record job status");
        }
        self.emit(event);
        self.prune().await;
    }

    /// Drop terminal jobs that finished longer ago than the retention window.
    async fn prune(&self) {
        let Some(cutoff) = TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return;
        };
        match self.store.prune(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned finished jobs"),
            Err(e) => warn!(error = %e, "Failed to prune finished jobs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn options() -> QueueOptions {
        QueueOptions {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
            ..QueueOptions::default()
        }
    }

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: Job, _token: CancellationToken) -> JobOutcome {
            self.seen.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Completed
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn handle(&self, _job: Job, _token: CancellationToken) -> JobOutcome {
            panic!("handler bug");
        }
    }

    async fn wait_for_status(queue: &JobQueue, id: JobId, status: JobStatus) {
        for _ in 0..200 {
            if queue.get(id).await.unwrap().map(|q| q.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_bound_consumer_runs_jobs() {
        let queue = JobQueue::in_memory(&options());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        queue.bind(JobKind::Update, handler.clone()).unwrap();

        let id = queue.enqueue(Job::update("github.com/a/b")).await.unwrap();
        wait_for_status(&queue, id, JobStatus::Completed).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
        queue.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_twice_fails() {
        let queue = JobQueue::in_memory(&options());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        queue.bind(JobKind::Index, handler.clone()).unwrap();
        let err = queue.bind(JobKind::Index, handler).err().unwrap();
        assert!(matches!(err, QueueError::KindAlreadyBound(JobKind::Index)));
        queue.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_marks_job_failed() {
        let queue = JobQueue::in_memory(&options());
        queue.bind(JobKind::Index, Arc::new(Panicking)).unwrap();
        let mut events = queue.subscribe();

        let id = queue
            .enqueue(Job::index("github.com/a/b", None, false))
            .await
            .unwrap();
        wait_for_status(&queue, id, JobStatus::Failed).await;

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::Failed { job_id, error, .. } = event {
                assert_eq!(job_id, id);
                assert!(error.contains("panicked"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        queue.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let queue = JobQueue::in_memory(&options());
        let id = queue.enqueue(Job::update("github.com/a/b")).await.unwrap();
        queue.cancel(id).await.unwrap();
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        // The slot is free again.
        queue.enqueue(Job::update("github.com/a/b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unbind_stops_consumer() {
        let queue = JobQueue::in_memory(&options());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let subscription = queue.bind(JobKind::Update, handler.clone()).unwrap();
        assert_eq!(subscription.kind(), JobKind::Update);
        subscription.unbind().await;
        assert!(!queue.is_bound(JobKind::Update));

        let id = queue.enqueue(Job::update("github.com/a/b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
    }
}
