//! Staff payment compliance sweep.
//!
//! Downgrades every overdue staff record to `un_paid` and appends one audit
//! entry per downgraded record. The whole sweep, across all businesses, runs in
//! a single transaction: either every downgrade and its audit entry lands, or
//! none of them do.

use crate::audit::{ActionType, AuditLogger, NewStaffAction};
use crate::background_job::BackgroundJob;
use crate::errors::JobError;
use crate::schema::{PaymentStatus, overdue_cutoff};
use crate::storage::{self, JobStatusStore};
use chrono::{NaiveDate, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{debug, error, info, instrument};

/// The default number of days a payment may be late before a downgrade.
pub const DEFAULT_GRACE_DAYS: u32 = 30;

/// Reason recorded on every automatic downgrade.
pub const DOWNGRADE_REASON: &str = "Payment overdue: no payment received within the grace period";

/// Configuration of the [`StaffPaymentComplianceJob`].
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    /// Number of days after the last payment before a staff member is overdue.
    pub grace_days: u32,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

/// Counters describing one compliance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplianceStats {
    /// Number of businesses inspected.
    pub businesses_scanned: usize,
    /// Number of businesses with at least one downgrade.
    pub businesses_affected: usize,
    /// Number of staff records downgraded (and audit entries written).
    pub staff_downgraded: usize,
}

/// Downgrades staff whose payments are overdue.
#[derive(Debug, Clone)]
pub struct StaffPaymentComplianceJob {
    store: JobStatusStore,
    audit: AuditLogger,
    config: ComplianceConfig,
}

impl StaffPaymentComplianceJob {
    /// Create a compliance job.
    pub fn new(store: JobStatusStore, audit: AuditLogger, config: ComplianceConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Run a sweep as of the current UTC date.
    pub async fn run_once(&self) -> Result<ComplianceStats, JobError> {
        self.run_as_of(Utc::now().date_naive()).await
    }

    /// Run a sweep treating `today` as the current date.
    ///
    /// Any failure rolls back every downgrade and audit entry of this sweep.
    #[instrument(name = "compliance.run", skip(self), fields(grace_days = self.config.grace_days))]
    pub async fn run_as_of(&self, today: NaiveDate) -> Result<ComplianceStats, JobError> {
        let cutoff = overdue_cutoff(today, self.config.grace_days);
        debug!(%cutoff, "Starting compliance sweep…");

        let mut tx = self.store.begin().await?;

        match self.sweep(&mut tx, cutoff).await {
            Ok(stats) => {
                tx.commit().await?;
                info!(
                    businesses_scanned = stats.businesses_scanned,
                    businesses_affected = stats.businesses_affected,
                    staff_downgraded = stats.staff_downgraded,
                    "Finished compliance sweep"
                );
                Ok(stats)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    error!("Failed to roll back compliance sweep: {rollback_error}");
                }
                error!("Compliance sweep rolled back: {error}");
                Err(error)
            }
        }
    }

    async fn sweep(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        cutoff: NaiveDate,
    ) -> Result<ComplianceStats, JobError> {
        let mut stats = ComplianceStats::default();

        for business_id in storage::distinct_business_ids(tx).await? {
            stats.businesses_scanned += 1;

            let overdue = storage::find_overdue_staff_tx(tx, business_id, cutoff).await?;
            if overdue.is_empty() {
                continue;
            }

            let staff_ids: Vec<i64> = overdue.iter().map(|staff| staff.staff_id).collect();
            let downgraded = storage::downgrade_staff_tx(tx, business_id, &staff_ids).await?;

            for staff_id in &downgraded {
                let entry = NewStaffAction::by_system(business_id, *staff_id, ActionType::StatusChange)
                    .value(PaymentStatus::UnPaid.as_str())
                    .reason(DOWNGRADE_REASON);
                self.audit.record_in(tx, &entry).await?;
            }

            info!(
                business.id = business_id,
                staff.count = downgraded.len(),
                "Downgraded overdue staff"
            );

            stats.businesses_affected += 1;
            stats.staff_downgraded += downgraded.len();
        }

        Ok(stats)
    }
}

impl BackgroundJob for StaffPaymentComplianceJob {
    const JOB_NAME: &'static str = "staff_payment_compliance";

    async fn run(&self) -> anyhow::Result<()> {
        self.run_once().await?;
        Ok(())
    }
}
