//! Report generation pipeline.
//!
//! Each run claims a bounded, oldest-first batch of pending reports and drives
//! every report through `processing` into either `completed` or `failed`.

use crate::background_job::BackgroundJob;
use crate::errors::{JobError, ReportError};
use crate::render::ReportRenderer;
use crate::schema::{Report, ReportFormat};
use crate::storage::JobStatusStore;
use crate::util::try_to_extract_panic_info;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::{JoinError, spawn_blocking};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

/// The default number of reports claimed per run.
pub const DEFAULT_BATCH_SIZE: i64 = 5;

/// Configuration of the [`ReportJobProcessor`].
#[derive(Debug, Clone)]
pub struct ReportJobConfig {
    /// Directory receiving the rendered artifacts.
    pub output_dir: PathBuf,
    /// Maximum number of reports processed per run.
    pub batch_size: i64,
}

impl Default for ReportJobConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Counters describing one processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportBatchStats {
    /// Number of pending reports fetched.
    pub fetched: usize,
    /// Number of reports that reached `completed`.
    pub completed: usize,
    /// Number of reports that reached `failed`.
    pub failed: usize,
    /// Number of reports claimed by another writer in the meantime.
    pub skipped: usize,
}

enum Outcome {
    Completed,
    Failed,
    Skipped,
}

/// Turns pending report requests into rendered artifacts.
#[derive(Debug)]
pub struct ReportJobProcessor<R> {
    store: JobStatusStore,
    renderer: Arc<R>,
    config: ReportJobConfig,
}

impl<R: ReportRenderer> ReportJobProcessor<R> {
    /// Create a processor.
    pub fn new(store: JobStatusStore, renderer: R, config: ReportJobConfig) -> Self {
        Self {
            store,
            renderer: Arc::new(renderer),
            config,
        }
    }

    /// Process one batch of pending reports.
    ///
    /// A failure to render or write a single report marks that report as
    /// `failed` and does not affect the rest of the batch. Failing to fetch the
    /// batch or to record a status transition aborts the run.
    #[instrument(name = "reports.run", skip(self))]
    pub async fn run_once(&self) -> Result<ReportBatchStats, JobError> {
        let reports = self
            .store
            .fetch_pending_reports(self.config.batch_size)
            .await?;

        if reports.is_empty() {
            debug!("No pending reports found");
            return Ok(ReportBatchStats::default());
        }

        info!(count = reports.len(), "Processing report batch…");

        let mut stats = ReportBatchStats {
            fetched: reports.len(),
            ..Default::default()
        };

        for report in &reports {
            let span = info_span!("report", report.id = report.id, report.format = ?report.format);
            match self.process(report).instrument(span).await? {
                Outcome::Completed => stats.completed += 1,
                Outcome::Failed => stats.failed += 1,
                Outcome::Skipped => stats.skipped += 1,
            }
        }

        info!(
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            "Finished report batch"
        );

        Ok(stats)
    }

    async fn process(&self, report: &Report) -> Result<Outcome, JobError> {
        if !self.store.mark_processing(report.id).await? {
            return Ok(Outcome::Skipped);
        }

        debug!("Generating report…");

        let result = AssertUnwindSafe(self.generate_artifact(report))
            .catch_unwind()
            .await
            .unwrap_or_else(|e| {
                Err(ReportError::Panicked(
                    try_to_extract_panic_info(&*e).to_string(),
                ))
            });

        match result {
            Ok(path) => {
                if !self.store.mark_completed(report.id, &path).await? {
                    return Ok(Outcome::Skipped);
                }
                info!(%path, "Report completed");
                Ok(Outcome::Completed)
            }
            Err(error) => {
                warn!("Failed to generate report: {error}");
                if !self.store.mark_failed(report.id, &error.to_string()).await? {
                    return Ok(Outcome::Skipped);
                }
                Ok(Outcome::Failed)
            }
        }
    }

    async fn generate_artifact(&self, report: &Report) -> Result<String, ReportError> {
        let data = self.renderer.generate(report).await?;

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = artifact_path(&self.config.output_dir, report.id, report.format);

        match report.format {
            ReportFormat::Json => {
                let contents = serde_json::to_vec_pretty(&data)?;
                tokio::fs::write(&path, contents).await?;
            }
            ReportFormat::Pdf => {
                let renderer = Arc::clone(&self.renderer);
                let pdf_path = path.clone();
                spawn_blocking(move || renderer.render_pdf(&data, &pdf_path))
                    .await
                    .map_err(join_error)??;
            }
        }

        path.into_os_string()
            .into_string()
            .map_err(|path| ReportError::NonUtf8Path(path.into()))
    }
}

impl<R: ReportRenderer> BackgroundJob for ReportJobProcessor<R> {
    const JOB_NAME: &'static str = "report_generation";

    async fn run(&self) -> anyhow::Result<()> {
        self.run_once().await?;
        Ok(())
    }
}

fn join_error(error: JoinError) -> ReportError {
    match error.try_into_panic() {
        Ok(payload) => ReportError::Panicked(try_to_extract_panic_info(&*payload).to_string()),
        Err(error) => ReportError::Cancelled(error),
    }
}

/// The deterministic location of a report's artifact:
/// `<output_dir>/report_<id>.<format>`.
pub fn artifact_path(output_dir: &Path, report_id: i64, format: ReportFormat) -> PathBuf {
    output_dir.join(format!("report_{report_id}.{}", format.extension()))
}
