use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use sentry_core::{Hub, SentryFutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, warn};

/// Shortest accepted interval between two ticks.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Type-erased invocation of a registered job.
pub(crate) type RunJobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Marks a job as running for as long as it is held.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) struct Worker {
    pub(crate) job_name: &'static str,
    pub(crate) run_job: RunJobFn,
    pub(crate) in_flight: Arc<AtomicBool>,
    pub(crate) interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) run_immediately: bool,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Random delay added before each run.
    fn jitter_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_millis))
    }

    /// Run the job on every tick until shutdown is requested.
    ///
    /// A run in progress is never interrupted. Shutdown takes effect before
    /// the next tick or while waiting out the jitter delay.
    pub(crate) async fn run(mut self) {
        let period = self.interval.max(MIN_INTERVAL);
        let start = if self.run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    debug!("Shutdown requested, no further runs will be scheduled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let delay = self.jitter_delay();
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => {
                        debug!("Shutdown requested during jitter delay, skipping run");
                        break;
                    }
                    _ = sleep(delay) => {}
                }
            }

            self.run_guarded().await;
        }
    }

    /// Run the job once, unless another run of the same job is still going.
    pub(crate) async fn run_guarded(&self) {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            warn!("Previous run is still in progress, skipping this tick");
            return;
        };

        info!("Starting job run…");
        let started = Instant::now();

        let result = with_sentry_transaction(self.job_name, async || {
            AssertUnwindSafe((self.run_job)())
                .catch_unwind()
                .await
                .map_err(|e| try_to_extract_panic_info(&*e))
                .and_then(std::convert::identity)
        })
        .bind_hub(Hub::current())
        .await;

        match result {
            Ok(()) => info!(elapsed = ?started.elapsed(), "Finished job run"),
            Err(error) => error!(elapsed = ?started.elapsed(), "Failed to run job: {error:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);

        let guard = InFlightGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlightGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
