//! Append-only staff audit trail.

use crate::errors::AuditError;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};

/// Actor name recorded for mutations performed by the background jobs.
pub const SYSTEM_ACTOR: &str = "system";

/// Role recorded for mutations performed by the background jobs.
pub const SYSTEM_ROLE: &str = "system";

/// Kind of action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// The payment status of a staff member changed
    StatusChange,
}

impl ActionType {
    /// The label stored in `staff_actions.action_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
        }
    }
}

/// An audit entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewStaffAction {
    /// Business of the affected staff member
    pub business_id: i64,
    /// Affected staff member
    pub staff_id: i64,
    /// Kind of action
    pub action_type: ActionType,
    /// New value set by the action
    pub action_value: Option<String>,
    /// Human readable justification
    pub reason: Option<String>,
    /// Actor who performed the action
    pub performed_by: String,
    /// Role of the actor
    pub performed_by_role: String,
}

impl NewStaffAction {
    /// An entry attributed to the system actor.
    pub fn by_system(business_id: i64, staff_id: i64, action_type: ActionType) -> Self {
        Self {
            business_id,
            staff_id,
            action_type,
            action_value: None,
            reason: None,
            performed_by: SYSTEM_ACTOR.to_string(),
            performed_by_role: SYSTEM_ROLE.to_string(),
        }
    }

    /// Set the value written by the action.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.action_value = Some(value.into());
        self
    }

    /// Set the justification of the action.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Appends entries to the `staff_actions` table.
///
/// The logger never reads or mutates business entities. A failed append is
/// always returned to the caller and logged with `audit.failure = true`.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    /// Create a logger backed by the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry in a transaction of its own.
    pub async fn record(&self, entry: &NewStaffAction) -> Result<i64, AuditError> {
        let mut tx = self.pool.begin().await.map_err(|error| {
            error!(audit.failure = true, %error, "Failed to open audit transaction");
            AuditError::TransactionFailed(error)
        })?;

        let id = self.record_in(&mut tx, entry).await?;

        tx.commit().await.map_err(|error| {
            error!(audit.failure = true, %error, "Failed to commit audit entry");
            AuditError::TransactionFailed(error)
        })?;

        Ok(id)
    }

    /// Append an entry as part of the caller's transaction.
    ///
    /// The entry becomes visible only if the caller commits, which keeps the
    /// audited mutation and its trail atomic.
    pub async fn record_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewStaffAction,
    ) -> Result<i64, AuditError> {
        let result = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO staff_actions
                (business_id, staff_id, action_type, action_value, reason, performed_by, performed_by_role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(entry.business_id)
        .bind(entry.staff_id)
        .bind(entry.action_type.as_str())
        .bind(entry.action_value.as_deref())
        .bind(entry.reason.as_deref())
        .bind(&entry.performed_by)
        .bind(&entry.performed_by_role)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(id) => {
                debug!(
                    audit.id = id,
                    business.id = entry.business_id,
                    staff.id = entry.staff_id,
                    action = entry.action_type.as_str(),
                    "Recorded staff action"
                );
                Ok(id)
            }
            Err(source) => {
                error!(
                    audit.failure = true,
                    business.id = entry.business_id,
                    staff.id = entry.staff_id,
                    action = entry.action_type.as_str(),
                    error = %source,
                    "Failed to record staff action"
                );
                Err(AuditError::InsertFailed {
                    business_id: entry.business_id,
                    staff_id: entry.staff_id,
                    action_type: entry.action_type.as_str(),
                    source,
                })
            }
        }
    }
}
