#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use anyhow::anyhow;
use business_workers::{BackgroundJob, Schedule, Scheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const MINUTE: Duration = Duration::from_secs(60);

/// Counts how often it was started, concurrently running runs, and completions.
#[derive(Debug, Default)]
struct Probe {
    starts: AtomicUsize,
    finished: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Probe {
    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn observe(&self, duration: Duration) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if !duration.is_zero() {
            sleep(duration).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Panic,
}

struct ProbeJob {
    probe: Arc<Probe>,
    duration: Duration,
    outcome: Outcome,
}

impl ProbeJob {
    fn new(probe: &Arc<Probe>) -> Self {
        Self {
            probe: probe.clone(),
            duration: Duration::ZERO,
            outcome: Outcome::Succeed,
        }
    }

    fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    fn ending_with(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}

impl BackgroundJob for ProbeJob {
    const JOB_NAME: &'static str = "probe";

    async fn run(&self) -> anyhow::Result<()> {
        self.probe.observe(self.duration).await;
        match self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(anyhow!("job failed")),
            Outcome::Panic => panic!("job exploded"),
        }
    }
}

/// Same behavior as [`ProbeJob`], registered under a different name.
struct OtherProbeJob(ProbeJob);

impl BackgroundJob for OtherProbeJob {
    const JOB_NAME: &'static str = "other_probe";

    async fn run(&self) -> anyhow::Result<()> {
        self.0.run().await
    }
}

fn every_minute(schedule: Schedule) -> Schedule {
    schedule.interval(MINUTE)
}

#[tokio::test(start_paused = true)]
async fn runs_immediately_and_then_on_every_interval() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), every_minute)
        .start();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.starts(), 1);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(probe.starts(), 3);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn first_run_can_wait_for_one_interval() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), |schedule| {
            schedule.interval(MINUTE).run_immediately(false)
        })
        .start();

    sleep(Duration::from_secs(59)).await;
    assert_eq!(probe.starts(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(probe.starts(), 1);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_runs_keep_their_schedule() -> anyhow::Result<()> {
    let failing = Arc::new(Probe::default());
    let panicking = Arc::new(Probe::default());

    let handle = Scheduler::new()
        .register(
            ProbeJob::new(&failing).ending_with(Outcome::Fail),
            every_minute,
        )
        .register(
            OtherProbeJob(ProbeJob::new(&panicking).ending_with(Outcome::Panic)),
            every_minute,
        )
        .start();

    sleep(Duration::from_secs(121)).await;
    assert_eq!(failing.starts(), 3);
    assert_eq!(panicking.starts(), 3);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn runs_of_the_same_job_never_overlap() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let slow = Duration::from_secs(150);

    // Two registrations under one name compete for the same in-flight slot.
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe).taking(slow), every_minute)
        .register(ProbeJob::new(&probe).taking(slow), every_minute)
        .start();

    sleep(Duration::from_secs(200)).await;
    assert_eq!(probe.starts(), 2);
    assert_eq!(probe.max_running(), 1);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    // The run in progress at shutdown was allowed to complete.
    assert_eq!(probe.finished(), 2);
    assert_eq!(probe.max_running(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn a_slow_job_does_not_delay_other_jobs() -> anyhow::Result<()> {
    let slow = Arc::new(Probe::default());
    let fast = Arc::new(Probe::default());

    let handle = Scheduler::new()
        .register(
            ProbeJob::new(&slow).taking(Duration::from_secs(600)),
            every_minute,
        )
        .register(OtherProbeJob(ProbeJob::new(&fast)), every_minute)
        .start();

    sleep(Duration::from_secs(181)).await;
    assert_eq!(slow.starts(), 1);
    assert_eq!(fast.starts(), 4);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_further_runs() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), every_minute)
        .start();

    sleep(Duration::from_secs(1)).await;
    handle.shutdown();
    handle.wait_for_shutdown().await;

    sleep(Duration::from_secs(600)).await;
    assert_eq!(probe.starts(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn jitter_delays_each_run_within_its_bound() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), |schedule| {
            schedule.interval(MINUTE).jitter(Duration::from_secs(10))
        })
        .start();

    // Ticks at 0s and 60s, each followed by at most 10s of jitter.
    sleep(Duration::from_secs(11)).await;
    assert_eq!(probe.starts(), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.starts(), 2);

    handle.shutdown();
    handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_jitter_skips_the_pending_run() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), |schedule| {
            schedule.interval(MINUTE).jitter(Duration::from_secs(3600))
        })
        .start();

    sleep(Duration::from_millis(1)).await;
    let starts_before_shutdown = probe.starts();

    handle.shutdown();
    handle.wait_for_shutdown().await;

    // The jitter drawn for the first tick is almost surely longer than 1ms.
    assert!(starts_before_shutdown <= 1);
    assert_eq!(probe.starts(), starts_before_shutdown);

    sleep(Duration::from_secs(7200)).await;
    assert_eq!(probe.starts(), starts_before_shutdown);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_scheduling() -> anyhow::Result<()> {
    let probe = Arc::new(Probe::default());
    let handle = Scheduler::new()
        .register(ProbeJob::new(&probe), every_minute)
        .start();

    sleep(Duration::from_secs(1)).await;
    drop(handle);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(probe.starts(), 1);

    Ok(())
}
