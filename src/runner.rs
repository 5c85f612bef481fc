use crate::background_job::{BackgroundJob, DEFAULT_INTERVAL};
use crate::worker::{RunJobFn, Worker};
use futures_util::FutureExt;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

const DEFAULT_JITTER: Duration = Duration::ZERO;

/// Marker type for a scheduler with at least one job
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for a scheduler without jobs
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

struct ScheduledJob {
    name: &'static str,
    run_job: RunJobFn,
    schedule: Schedule,
}

/// Runs registered jobs once immediately and then on a fixed interval.
///
/// Each job gets its own task, so distinct jobs run independently of each
/// other. Errors and panics raised by a run are logged and never stop the
/// schedule.
pub struct Scheduler<State = Unconfigured> {
    jobs: Vec<ScheduledJob>,
    in_flight: HashMap<&'static str, Arc<AtomicBool>>,
    _state: PhantomData<State>,
}

impl<State: std::fmt::Debug> std::fmt::Debug for Scheduler<State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field(
                "jobs",
                &self
                    .jobs
                    .iter()
                    .map(|job| (job.name, &job.schedule))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler without any jobs.
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            in_flight: HashMap::new(),
            _state: PhantomData,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl<State> Scheduler<State> {
    /// Register a job with a schedule.
    ///
    /// Registrations of jobs with the same [`BackgroundJob::JOB_NAME`] share a
    /// single in-flight guard, so at most one of them runs at any time.
    pub fn register<J: BackgroundJob>(
        mut self,
        job: J,
        config_fn: impl FnOnce(Schedule) -> Schedule,
    ) -> Scheduler<Configured> {
        let job = Arc::new(job);
        let run_job: RunJobFn = Arc::new(move || {
            let job = job.clone();
            async move { job.run().await }.boxed()
        });

        self.in_flight.entry(J::JOB_NAME).or_default();
        self.jobs.push(ScheduledJob {
            name: J::JOB_NAME,
            run_job,
            schedule: config_fn(Schedule::default()),
        });

        Scheduler {
            jobs: self.jobs,
            in_flight: self.in_flight,
            _state: PhantomData,
        }
    }
}

impl Scheduler<Configured> {
    /// Start one scheduling task per registered job.
    ///
    /// This returns a [`RunHandle`] which is used to stop scheduling and to
    /// wait for the tasks to finish.
    pub fn start(self) -> RunHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            info!(
                job.name = job.name,
                interval = ?job.schedule.interval,
                "Scheduling job…"
            );

            let in_flight = self.in_flight.get(job.name).cloned().unwrap_or_default();

            let worker = Worker {
                job_name: job.name,
                run_job: job.run_job,
                in_flight,
                interval: job.schedule.interval,
                jitter: job.schedule.jitter,
                run_immediately: job.schedule.run_immediately,
                shutdown: shutdown_rx.clone(),
            };

            let span = info_span!("job", job.name = job.name);
            let handle = tokio::spawn(async move { worker.run().instrument(span).await });

            handles.push(handle);
        }

        RunHandle {
            handles,
            shutdown: shutdown_tx,
        }
    }
}

/// Handle to the running scheduling tasks.
///
/// Dropping the handle stops scheduling further runs, like [`Self::shutdown`].
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl RunHandle {
    /// Stop scheduling new runs.
    ///
    /// Runs that are already executing are allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for all scheduling tasks to finish.
    ///
    /// This only returns after [`Self::shutdown`] has been called.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "Scheduling task panicked");
            }
        });
    }
}

/// Timing configuration of a registered job
#[derive(Debug, Clone)]
pub struct Schedule {
    interval: Duration,
    jitter: Duration,
    run_immediately: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            jitter: DEFAULT_JITTER,
            run_immediately: true,
        }
    }
}

impl Schedule {
    /// Set the time between two runs.
    ///
    /// If a run takes longer than the interval, the ticks it overlapped are
    /// skipped rather than queued up.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the maximum random jitter added before each run.
    ///
    /// Jitter spreads out jobs sharing the same interval so they do not hit
    /// the database at the same instant.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set whether the first run happens at start or after one interval.
    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }
}
