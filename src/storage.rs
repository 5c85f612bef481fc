use crate::schema::{PaymentStatus, Report, ReportFormat, ReportStatus, StaffRecord};
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

/// Create or upgrade the `reports`, `staff`, and `staff_actions` tables.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Transactional access to the report and staff tables.
///
/// The store is constructed explicitly and handed to each job, so every job
/// owns a clone of the same underlying connection pool.
#[derive(Debug, Clone)]
pub struct JobStatusStore {
    pool: PgPool,
}

impl JobStatusStore {
    /// Create a store backed by the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a transaction.
    ///
    /// Dropping the returned transaction without committing rolls it back and
    /// releases the connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Insert a new pending report request and return its id.
    pub async fn enqueue_report(
        &self,
        business_id: i64,
        params: Value,
        format: ReportFormat,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO reports (business_id, params, format) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(business_id)
        .bind(params)
        .bind(format)
        .fetch_one(&self.pool)
        .await
    }

    /// Fetch up to `limit` pending reports, oldest first.
    pub async fn fetch_pending_reports(&self, limit: i64) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            r"
            SELECT id, business_id, params, format, status, result_path, error, created_at, updated_at
            FROM reports
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Load a single report.
    pub async fn find_report(&self, id: i64) -> Result<Option<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            r"
            SELECT id, business_id, params, format, status, result_path, error, created_at, updated_at
            FROM reports
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Claims a pending report for processing.
    ///
    /// Returns `false` if the report was no longer pending, which means some
    /// other writer already claimed it.
    pub async fn mark_processing(&self, id: i64) -> Result<bool, sqlx::Error> {
        self.transition(id, ReportStatus::Pending, ReportStatus::Processing, None, None)
            .await
    }

    /// Records a successful report along with the location of its artifact.
    pub async fn mark_completed(&self, id: i64, result_path: &str) -> Result<bool, sqlx::Error> {
        self.transition(
            id,
            ReportStatus::Processing,
            ReportStatus::Completed,
            Some(result_path),
            None,
        )
        .await
    }

    /// Records a failed report along with the failure message.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<bool, sqlx::Error> {
        self.transition(
            id,
            ReportStatus::Processing,
            ReportStatus::Failed,
            None,
            Some(error),
        )
        .await
    }

    async fn transition(
        &self,
        id: i64,
        from: ReportStatus,
        to: ReportStatus,
        result_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE reports
            SET status = $3, result_path = $4, error = $5, updated_at = NOW()
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(result_path)
        .bind(error)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            warn!(report.id = id, ?from, ?to, "Report was not in the expected status");
        }
        Ok(applied)
    }
}

/// Distinct business identifiers present in the staff table, in ascending order.
pub(crate) async fn distinct_business_ids(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT DISTINCT business_id FROM staff ORDER BY business_id")
        .fetch_all(&mut **tx)
        .await
}

/// Locks and returns the staff of a business that are due for a downgrade.
///
/// A staff record is due when it is not already `un_paid` and its last payment
/// is either missing or strictly older than `cutoff`.
pub(crate) async fn find_overdue_staff_tx(
    tx: &mut Transaction<'_, Postgres>,
    business_id: i64,
    cutoff: NaiveDate,
) -> Result<Vec<StaffRecord>, sqlx::Error> {
    sqlx::query_as::<_, StaffRecord>(
        r"
        SELECT business_id, staff_id, payment_status, last_payment_date
        FROM staff
        WHERE business_id = $1
          AND payment_status <> 'un_paid'
          AND (last_payment_date IS NULL OR last_payment_date < $2)
        ORDER BY staff_id ASC
        FOR UPDATE
        ",
    )
    .bind(business_id)
    .bind(cutoff)
    .fetch_all(&mut **tx)
    .await
}

/// Downgrades the given staff of a business to `un_paid` in one statement.
///
/// Returns the ids of the rows that were actually changed.
pub(crate) async fn downgrade_staff_tx(
    tx: &mut Transaction<'_, Postgres>,
    business_id: i64,
    staff_ids: &[i64],
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r"
        UPDATE staff
        SET payment_status = $3
        WHERE business_id = $1 AND staff_id = ANY($2) AND payment_status <> $3
        RETURNING staff_id
        ",
    )
    .bind(business_id)
    .bind(staff_ids)
    .bind(PaymentStatus::UnPaid)
    .fetch_all(&mut **tx)
    .await
}

/// All staff of a business, optionally restricted to one payment status.
pub(crate) async fn list_staff(
    pool: &PgPool,
    business_id: i64,
    payment_status: Option<PaymentStatus>,
) -> Result<Vec<StaffRecord>, sqlx::Error> {
    sqlx::query_as::<_, StaffRecord>(
        r"
        SELECT business_id, staff_id, payment_status, last_payment_date
        FROM staff
        WHERE business_id = $1 AND ($2::payment_status IS NULL OR payment_status = $2)
        ORDER BY staff_id ASC
        ",
    )
    .bind(business_id)
    .bind(payment_status)
    .fetch_all(pool)
    .await
}
