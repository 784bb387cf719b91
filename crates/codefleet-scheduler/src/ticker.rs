//! Periodic task primitive shared by the schedulers and cyclic queue jobs.

use futures::future::BoxFuture;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a task at a fixed interval until stopped.
///
/// A tick that is still running when the next one is due delays it; ticks never
/// overlap. [`Ticker::stop`] waits for the in-flight tick to finish.
pub struct Ticker {
    name: String,
    interval: Duration,
    immediate: bool,
    running: Mutex<Option<Running>>,
}

impl Ticker {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            immediate: false,
            running: Mutex::new(None),
        }
    }

    /// Fire the first tick right away instead of after one interval.
    pub fn run_immediately(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start ticking. Returns `false` if the ticker was already running.
    pub fn start<F>(&self, task: F) -> bool
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let name = self.name.clone();
        let period = self.interval.max(Duration::from_millis(1));
        let start = if self.immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(ticker = %name, ?period, "Ticker started");
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        // Run the tick in its own task so a panic does not kill the ticker.
                        if let Err(e) = tokio::spawn(task()).await {
                            warn!(ticker = %name, error = %e, "Tick panicked");
                        }
                    }
                }
            }
            debug!(ticker = %name, "Ticker stopped");
        });

        *running = Some(Running { stop, handle });
        true
    }

    /// Stop ticking and wait for the in-flight tick. Stopping a stopped ticker is a no-op.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.stop.cancel();
            if let Err(e) = running.handle.await {
                warn!(ticker = %self.name, error = %e, "Ticker task ended abnormally");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            running.stop.cancel();
        }
    }
}
