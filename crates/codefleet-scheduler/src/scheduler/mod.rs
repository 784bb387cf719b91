//! Schedulers that turn repository records into jobs.
//!
//! A [`Scheduler`] runs a [`Sweep`] either on demand ([`Scheduler::schedule`])
//! or on a fixed interval between [`Scheduler::start`] and [`Scheduler::stop`].

mod sweeps;

pub use sweeps::{CloneSweep, IndexSweep, UpdateSweep, is_stale};

use async_trait::async_trait;
use codefleet_core::Job;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;
use crate::ticker::Ticker;

pub type CloneScheduler = Scheduler<CloneSweep>;
pub type UpdateScheduler = Scheduler<UpdateSweep>;
pub type IndexScheduler = Scheduler<IndexSweep>;

/// One pass over the tracked repositories.
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Enqueue the jobs that are due. Returns how many were enqueued.
    async fn sweep(&self) -> usize;
}

pub struct Scheduler<S: Sweep> {
    sweep: Arc<S>,
    ticker: Option<Ticker>,
    enabled: bool,
}

impl<S: Sweep> Scheduler<S> {
    /// A scheduler that sweeps every `frequency` once started.
    pub fn periodic(sweep: S, frequency: Duration) -> Self {
        let ticker = Ticker::new(sweep.name(), frequency);
        Self {
            sweep: Arc::new(sweep),
            ticker: Some(ticker),
            enabled: true,
        }
    }

    /// A scheduler that only sweeps when [`Scheduler::schedule`] is called.
    pub fn on_demand(sweep: S) -> Self {
        Self {
            sweep: Arc::new(sweep),
            ticker: None,
            enabled: true,
        }
    }

    /// A scheduler that never enqueues anything.
    pub fn disabled(sweep: S) -> Self {
        Self {
            sweep: Arc::new(sweep),
            ticker: None,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run one sweep now.
    pub async fn schedule(&self) -> usize {
        if !self.enabled {
            debug!(scheduler = self.sweep.name(), "Scheduler disabled");
            return 0;
        }
        self.sweep.sweep().await
    }

    /// Start periodic sweeps. Returns `false` if disabled, on-demand or already running.
    pub fn start(&self) -> bool {
        let Some(ticker) = self.ticker.as_ref().filter(|_| self.enabled) else {
            return false;
        };
        let sweep = self.sweep.clone();
        let started = ticker.start(move || {
            let sweep = sweep.clone();
            async move {
                let enqueued = sweep.sweep().await;
                debug!(scheduler = sweep.name(), enqueued, "Scheduler tick");
            }
            .boxed()
        });
        if started {
            info!(scheduler = self.sweep.name(), interval = ?ticker.interval(), "Scheduler started");
        }
        started
    }

    /// Stop periodic sweeps, waiting for the in-flight one.
    pub async fn stop(&self) {
        if let Some(ticker) = &self.ticker {
            if ticker.is_running() {
                ticker.stop().await;
                info!(scheduler = self.sweep.name(), "Scheduler stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(Ticker::is_running)
    }
}

/// Enqueue `job`, treating an already-active job as expected.
pub(crate) async fn enqueue_quietly(queue: &JobQueue, job: Job) -> bool {
    let (uri, kind) = (job.repository_uri.clone(), job.kind);
    match queue.enqueue(job).await {
        Ok(id) => {
            debug!(job_id = %id, repo = %uri, %kind, "Scheduled job");
            true
        }
        Err(e) if e.is_duplicate() => {
            debug!(repo = %uri, %kind, "Job already active");
            false
        }
        Err(e) => {
            warn!(repo = %uri, %kind, error = %e, "Failed to schedule job");
            false
        }
    }
}
