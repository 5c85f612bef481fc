use thiserror::Error;

/// Error that aborts a whole job run.
///
/// Nothing is persisted by the run that raised it beyond what was already
/// committed: the report processor only surfaces this before or between
/// per-report transitions, and the compliance sweep rolls back entirely.
#[derive(Debug, Error)]
pub enum JobError {
    /// A database error occurred while fetching work or writing a transition.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// An audit entry could not be written.
    #[error(transparent)]
    AuditError(#[from] AuditError),
}

/// Error raised while appending to the staff audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit entry could not be inserted.
    #[error("Failed to record {action_type} for staff {staff_id} of business {business_id}: {source}")]
    InsertFailed {
        /// Business of the affected staff member
        business_id: i64,
        /// Affected staff member
        staff_id: i64,
        /// Kind of action that went unrecorded
        action_type: &'static str,
        /// Underlying database error
        #[source]
        source: sqlx::Error,
    },

    /// The standalone transaction could not be opened or committed.
    #[error("Audit transaction failed: {0}")]
    TransactionFailed(#[source] sqlx::Error),
}

/// Error raised by a [`ReportRenderer`](crate::ReportRenderer).
#[derive(Debug, Error)]
pub enum RenderError {
    /// The report parameters could not be interpreted.
    #[error("Invalid report parameters: {0}")]
    InvalidParams(#[source] serde_json::Error),

    /// The data needed for the report could not be loaded.
    #[error("Failed to load report data: {0}")]
    DataUnavailable(#[from] sqlx::Error),

    /// The PDF document could not be produced.
    #[error("Failed to render PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    /// The artifact could not be written.
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Error contained to a single report; the report is marked `failed` with
/// this error's message and the batch moves on.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The renderer failed to produce data or a document.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The report data could not be serialized.
    #[error("Failed to serialize report data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The artifact could not be written to the output directory.
    #[error("Failed to write report artifact: {0}")]
    Io(#[from] std::io::Error),

    /// The renderer panicked.
    #[error("Report generation {0}")]
    Panicked(String),

    /// The blocking rendering task was cancelled before it finished.
    #[error("Report rendering was cancelled: {0}")]
    Cancelled(#[source] tokio::task::JoinError),

    /// The artifact path is not valid UTF-8 and cannot be stored.
    #[error("Artifact path is not valid UTF-8: {0}")]
    NonUtf8Path(std::path::PathBuf),
}
