mod common;

use chrono::{TimeDelta, Utc};
use codefleet_core::{JobKind, RepoState, RepositoryRecord};
use codefleet_scheduler::scheduler::{CloneSweep, IndexSweep, UpdateSweep};
use codefleet_scheduler::{CloneScheduler, CloneWorker, IndexScheduler, UpdateScheduler, Worker};
use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;

const OTHER_URL: &str = "git@gitlab.com:group/tool.git";
const OTHER_URI: &str = "gitlab.com/group/tool";

fn clone_scheduler(h: &Harness) -> CloneScheduler {
    CloneScheduler::on_demand(CloneSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        vec![URL.to_string(), OTHER_URL.to_string(), "not a url".to_string()],
    ))
}

async fn seed(h: &Harness, last: Option<chrono::DateTime<Utc>>) {
    let mut record = RepositoryRecord::new(URI, URL);
    record.state = RepoState::Indexed;
    record.revision_cloned = Some("rev-1".into());
    record.revision_indexed = Some("rev-1".into());
    record.last_updated_at = last;
    record.last_indexed_at = last;
    h.ctx.records.save(&record).await.unwrap();
}

#[tokio::test]
async fn test_clone_scheduler_converges() {
    let h = harness();
    let scheduler = clone_scheduler(&h);

    assert_eq!(scheduler.schedule().await, 2);
    for uri in [URI, OTHER_URI] {
        let record = h.ctx.records.get(uri).await.unwrap().unwrap();
        assert_eq!(record.state, RepoState::Uncloned);
    }

    // The clones are still pending: nothing new is enqueued.
    assert_eq!(scheduler.schedule().await, 0);
    assert_eq!(h.ctx.queue.list().await.unwrap().len(), 2);

    Worker::new(CloneWorker, h.ctx.clone()).bind().unwrap();
    wait_for_state(&h.ctx.records, URI, RepoState::Cloned).await;
    wait_for_state(&h.ctx.records, OTHER_URI, RepoState::Cloned).await;

    assert_eq!(scheduler.schedule().await, 0);
    h.ctx.queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_disabled_index_scheduler_enqueues_nothing() {
    let h = harness();
    seed(&h, None).await;
    let scheduler = IndexScheduler::disabled(IndexSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        Duration::from_secs(60),
    ));

    assert!(!scheduler.is_enabled());
    assert!(!scheduler.start());
    assert_eq!(scheduler.schedule().await, 0);
    assert!(h.ctx.queue.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_scheduler_respects_staleness() {
    let h = harness();
    let scheduler = IndexScheduler::on_demand(IndexSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        Duration::from_secs(3600),
    ));

    seed(&h, Some(Utc::now())).await;
    assert_eq!(scheduler.schedule().await, 0);

    seed(&h, Some(Utc::now() - TimeDelta::hours(2))).await;
    assert_eq!(scheduler.schedule().await, 1);
    // Duplicate enqueues are skipped.
    assert_eq!(scheduler.schedule().await, 0);

    let jobs = h.ctx.queue.list().await.unwrap();
    assert_eq!(jobs[0].job.kind, JobKind::Index);
}

#[tokio::test]
async fn test_update_scheduler_skips_uncloned() {
    let h = harness();
    h.ctx
        .records
        .save(&RepositoryRecord::new(OTHER_URI, OTHER_URL))
        .await
        .unwrap();
    seed(&h, None).await;

    let scheduler = UpdateScheduler::on_demand(UpdateSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        Duration::from_secs(3600),
    ));
    assert_eq!(scheduler.schedule().await, 1);

    let jobs = h.ctx.queue.list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job.repository_uri, URI);
    assert_eq!(jobs[0].job.kind, JobKind::Update);
}

#[tokio::test]
async fn test_periodic_scheduler_start_stop() {
    let h = harness();
    seed(&h, None).await;
    let scheduler = UpdateScheduler::periodic(
        UpdateSweep::new(
            h.ctx.queue.clone(),
            h.ctx.records.clone(),
            Duration::from_secs(3600),
        ),
        Duration::from_millis(20),
    );

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    let queue = h.ctx.queue.clone();
    eventually("update job to be scheduled", || {
        let queue = queue.clone();
        async move { !queue.list().await.unwrap().is_empty() }
    })
    .await;

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert_eq!(h.ctx.queue.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_clone_scheduler_resumes_unfinished_clones() {
    let h = harness();
    let mut interrupted = RepositoryRecord::new(URI, URL);
    interrupted.state = RepoState::Cloning;
    h.ctx.records.save(&interrupted).await.unwrap();
    let mut failed = RepositoryRecord::new(OTHER_URI, OTHER_URL);
    failed.fail("authentication failed", false);
    h.ctx.records.save(&failed).await.unwrap();

    let scheduler = clone_scheduler(&h);
    assert_eq!(scheduler.schedule().await, 2);
    let jobs = h.ctx.queue.list().await.unwrap();
    assert!(jobs.iter().all(|q| q.job.kind == JobKind::Clone));

    Worker::new(CloneWorker, h.ctx.clone()).bind().unwrap();
    wait_for_state(&h.ctx.records, URI, RepoState::Cloned).await;
    wait_for_state(&h.ctx.records, OTHER_URI, RepoState::Cloned).await;
    h.ctx.queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_transient_clone_failure_retried_on_later_tick() {
    let h = harness();
    h.git.failing_clones.store(1, Ordering::SeqCst);
    Worker::new(CloneWorker, h.ctx.clone()).bind().unwrap();

    let scheduler = CloneScheduler::on_demand(CloneSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        vec![URL.to_string()],
    ));
    assert_eq!(scheduler.schedule().await, 1);
    eventually("clone to fail", || {
        let records = h.ctx.records.clone();
        async move {
            records
                .get(URI)
                .await
                .unwrap()
                .is_some_and(|r| r.state == RepoState::Error && r.retryable)
        }
    })
    .await;

    let update = UpdateScheduler::periodic(
        UpdateSweep::new(h.ctx.queue.clone(), h.ctx.records.clone(), Duration::ZERO),
        Duration::from_millis(20),
    );
    assert!(update.start());
    wait_for_state(&h.ctx.records, URI, RepoState::Cloned).await;
    update.stop().await;

    assert_eq!(h.git.clones.load(Ordering::SeqCst), 2);
    let record = h.ctx.records.get(URI).await.unwrap().unwrap();
    assert!(record.last_error.is_none());
    assert_eq!(record.revision_cloned.as_deref(), Some("rev-1"));
    h.ctx.queue.destroy().await.unwrap();
}

#[tokio::test]
async fn test_update_scheduler_leaves_permanent_clone_failures() {
    let h = harness();
    let mut failed = RepositoryRecord::new(URI, URL);
    failed.fail("repository not found", false);
    h.ctx.records.save(&failed).await.unwrap();

    let scheduler = UpdateScheduler::on_demand(UpdateSweep::new(
        h.ctx.queue.clone(),
        h.ctx.records.clone(),
        Duration::ZERO,
    ));
    assert_eq!(scheduler.schedule().await, 0);
    assert!(h.ctx.queue.list().await.unwrap().is_empty());
}
