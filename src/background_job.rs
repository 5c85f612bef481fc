use std::future::Future;

/// The default interval between two scheduled runs of a job.
pub const DEFAULT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Trait for defining periodic background jobs.
///
/// A job owns everything it needs to run (store handles, renderers,
/// configuration) and is handed to the [`Scheduler`](crate::Scheduler), which
/// invokes [`run`](Self::run) once immediately and then on a fixed interval.
pub trait BackgroundJob: Send + Sync + 'static {
    /// Unique name of the job.
    ///
    /// Two registrations sharing a name never run at the same time.
    const JOB_NAME: &'static str;

    /// Execute one run of the job.
    ///
    /// An error fails this run only. It is logged by the scheduler and the
    /// next tick starts from scratch.
    fn run(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}
