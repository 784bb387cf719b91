mod common;

use async_trait::async_trait;
use codefleet_config::QueueOptions;
use codefleet_core::{Job, JobKind, JobOptions, JobStatus, LifecycleEvent};
use codefleet_scheduler::{JobHandler, JobOutcome, JobQueue, MemoryQueueStore, QueueError, QueueStore};
use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Counting {
    runs: AtomicUsize,
}

#[async_trait]
impl JobHandler for Counting {
    async fn handle(&self, _job: Job, _token: CancellationToken) -> JobOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        JobOutcome::Completed
    }
}

/// Runs until its token is cancelled.
struct UntilCancelled;

#[async_trait]
impl JobHandler for UntilCancelled {
    async fn handle(&self, _job: Job, token: CancellationToken) -> JobOutcome {
        token.cancelled().await;
        JobOutcome::Cancelled
    }
}

#[tokio::test]
async fn test_cyclic_job_redelivered_until_cancelled() {
    let queue = JobQueue::in_memory(&queue_options());
    let handler = Arc::new(Counting::default());
    queue.bind(JobKind::Update, handler.clone()).unwrap();

    let job = Job::update(URI).with_options(JobOptions::every(Duration::from_millis(40)));
    let id = queue.enqueue(job).await.unwrap();

    eventually("three deliveries", || {
        let handler = handler.clone();
        async move { handler.runs.load(Ordering::SeqCst) >= 3 }
    })
    .await;

    queue.cancel(id).await.unwrap();
    let seen = handler.runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handler.runs.load(Ordering::SeqCst) <= seen + 1);
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_cancel_by_redelivered_id_stops_cycle() {
    let queue = JobQueue::in_memory(&queue_options());
    let handler = Arc::new(Counting::default());
    queue.bind(JobKind::Update, handler.clone()).unwrap();

    let job = Job::update(URI).with_options(JobOptions::every(Duration::from_millis(40)));
    let origin = queue.enqueue(job).await.unwrap();
    eventually("a redelivery", || {
        let handler = handler.clone();
        async move { handler.runs.load(Ordering::SeqCst) >= 2 }
    })
    .await;

    let redelivered = queue
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.job.id)
        .find(|id| *id != origin)
        .unwrap();
    queue.cancel(redelivered).await.unwrap();

    let seen = handler.runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handler.runs.load(Ordering::SeqCst) <= seen + 1);
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_recover_interrupted_jobs_on_restart() {
    let store = Arc::new(MemoryQueueStore::new());
    // A previous process claimed this job and died.
    let stale = Job::clone_repo(URI, URL);
    store.insert(&stale, false).await.unwrap();
    store.claim(JobKind::Clone).await.unwrap();

    let queue = JobQueue::new(store.clone(), &queue_options());
    let mut events = queue.subscribe();
    assert!(queue.enqueue(Job::clone_repo(URI, URL)).await.unwrap_err().is_duplicate());

    assert_eq!(queue.recover_interrupted().await.unwrap(), 1);
    let recovered = queue.get(stale.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert!(recovered.error.unwrap().contains("interrupted"));
    assert!(matches!(
        events.try_recv().unwrap(),
        LifecycleEvent::Failed { job_id, .. } if job_id == stale.id
    ));

    let handler = Arc::new(Counting::default());
    queue.bind(JobKind::Clone, handler.clone()).unwrap();
    let id = queue.enqueue(Job::clone_repo(URI, URL)).await.unwrap();
    wait_for_job(&queue, id, JobStatus::Completed).await;
    assert_eq!(queue.recover_interrupted().await.unwrap(), 0);
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_finished_jobs_pruned_after_retention() {
    let queue = JobQueue::in_memory(&QueueOptions {
        retention: Duration::ZERO,
        ..queue_options()
    });
    let handler = Arc::new(Counting::default());
    queue.bind(JobKind::Update, handler.clone()).unwrap();

    let id = queue.enqueue(Job::update(URI)).await.unwrap();
    eventually("finished job to be pruned", || {
        let queue = queue.clone();
        async move { queue.get(id).await.unwrap().is_none() }
    })
    .await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert!(queue.list().await.unwrap().is_empty());
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroy_closes_queue() {
    let queue = JobQueue::in_memory(&queue_options());
    queue.bind(JobKind::Clone, Arc::new(Counting::default())).unwrap();
    let id = queue.enqueue(Job::update(URI)).await.unwrap();

    queue.destroy().await.unwrap();
    assert!(queue.is_closed());
    assert!(matches!(
        queue.enqueue(Job::update(URI)).await,
        Err(QueueError::QueueClosed)
    ));
    assert!(matches!(queue.cancel(id).await, Err(QueueError::QueueClosed)));
    assert!(matches!(queue.list().await, Err(QueueError::QueueClosed)));
    assert!(matches!(
        queue.bind(JobKind::Index, Arc::new(Counting::default())),
        Err(QueueError::QueueClosed)
    ));
    assert!(matches!(queue.destroy().await, Err(QueueError::QueueClosed)));
}

#[tokio::test]
async fn test_destroy_cancels_running_job() {
    let queue = JobQueue::in_memory(&queue_options());
    queue.bind(JobKind::Index, Arc::new(UntilCancelled)).unwrap();
    let id = queue.enqueue(Job::index(URI, None, false)).await.unwrap();
    wait_for_job(&queue, id, JobStatus::Running).await;

    tokio::time::timeout(Duration::from_secs(2), queue.destroy())
        .await
        .expect("destroy waits only for cancelled jobs")
        .unwrap();
}

#[tokio::test]
async fn test_cancel_running_job_signals_token() {
    let queue = JobQueue::in_memory(&queue_options());
    queue.bind(JobKind::Index, Arc::new(UntilCancelled)).unwrap();
    let id = queue.enqueue(Job::index(URI, None, false)).await.unwrap();
    wait_for_job(&queue, id, JobStatus::Running).await;

    queue.cancel(id).await.unwrap();
    wait_for_job(&queue, id, JobStatus::Cancelled).await;
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_queue_timeout_fails_job() {
    let queue = JobQueue::in_memory(&QueueOptions {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_millis(50),
        ..QueueOptions::default()
    });
    queue.bind(JobKind::Index, Arc::new(UntilCancelled)).unwrap();
    let id = queue.enqueue(Job::index(URI, None, false)).await.unwrap();
    wait_for_job(&queue, id, JobStatus::Failed).await;

    let job = queue.get(id).await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("timed out"));
    queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_superseding_emits_cancellation() {
    let queue = JobQueue::in_memory(&queue_options());
    let mut events = queue.subscribe();

    let first = queue
        .enqueue(Job::index(URI, Some("rev-1".into()), false))
        .await
        .unwrap();
    let second = queue
        .enqueue_superseding(Job::index(URI, Some("rev-2".into()), false))
        .await
        .unwrap();

    assert_eq!(
        queue.get(first).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(matches!(received[0], LifecycleEvent::Enqueued { job_id, .. } if job_id == first));
    assert!(matches!(received[1], LifecycleEvent::Cancelled { job_id, .. } if job_id == first));
    assert!(matches!(received[2], LifecycleEvent::Enqueued { job_id, .. } if job_id == second));
}
