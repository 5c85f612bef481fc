#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod audit;
mod background_job;
mod compliance;
mod errors;
mod render;
mod report;
mod runner;
/// Database schema definitions.
pub mod schema;
mod storage;
mod util;
mod worker;

/// Append-only staff audit trail.
pub use self::audit::{ActionType, AuditLogger, NewStaffAction, SYSTEM_ACTOR, SYSTEM_ROLE};
/// The main trait for defining periodic jobs.
pub use self::background_job::{BackgroundJob, DEFAULT_INTERVAL};
/// The staff payment compliance sweep.
pub use self::compliance::{
    ComplianceConfig, ComplianceStats, DEFAULT_GRACE_DAYS, DOWNGRADE_REASON,
    StaffPaymentComplianceJob,
};
/// Error types raised by the jobs and their collaborators.
pub use self::errors::{AuditError, JobError, RenderError, ReportError};
/// Report data and renderers.
pub use self::render::{ReportData, ReportRenderer, StaffPaymentRenderer, write_pdf};
/// The report generation pipeline.
pub use self::report::{
    DEFAULT_BATCH_SIZE, ReportBatchStats, ReportJobConfig, ReportJobProcessor, artifact_path,
};
/// The scheduler driving the jobs.
pub use self::runner::{Configured, RunHandle, Schedule, Scheduler, Unconfigured};
/// Transactional access to the job tables.
pub use self::storage::{JobStatusStore, setup_database};
