//! Database schema definitions for SQLx.
//!
//! This module contains the row types and Postgres enums shared by the report
//! and compliance jobs.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Lifecycle of a report request.
///
/// Transitions only move forward: `pending → processing → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Waiting to be picked up by the processor
    Pending,
    /// Claimed by a processor run
    Processing,
    /// Artifact written, `result_path` is set
    Completed,
    /// Generation failed, `error` is set
    Failed,
}

/// Output format of a report artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_format", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Pretty-printed JSON of the report data
    Json,
    /// Formatted PDF document
    Pdf,
}

impl ReportFormat {
    /// File extension used for artifacts of this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pdf => "pdf",
        }
    }
}

/// A queued report request
#[derive(Debug, Clone, FromRow)]
pub struct Report {
    /// Unique identifier for the report
    pub id: i64,
    /// Business the report is generated for
    pub business_id: i64,
    /// Renderer-specific parameters
    pub params: Value,
    /// Requested output format
    pub format: ReportFormat,
    /// Current lifecycle status
    pub status: ReportStatus,
    /// Location of the artifact, set only once completed
    pub result_path: Option<String>,
    /// Failure message, set only once failed
    pub error: Option<String>,
    /// Timestamp when the report was requested (FIFO key)
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last status change
    pub updated_at: DateTime<Utc>,
}

/// Payment standing of a staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Payments are up to date
    Paid,
    /// Downgraded for missing payments
    UnPaid,
}

impl PaymentStatus {
    /// The database label of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::UnPaid => "un_paid",
        }
    }
}

/// A staff member of a business
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StaffRecord {
    /// Business the staff member belongs to
    pub business_id: i64,
    /// Staff identifier, unique within the business
    pub staff_id: i64,
    /// Current payment standing
    pub payment_status: PaymentStatus,
    /// Date of the most recent payment, if any was ever made
    pub last_payment_date: Option<NaiveDate>,
}

impl StaffRecord {
    /// Whether this record is due for an automatic downgrade.
    ///
    /// A record is overdue when it is not already `un_paid` and has either
    /// never been paid or was last paid strictly before `today - grace_days`.
    /// This mirrors the predicate used by the compliance sweep query.
    pub fn is_overdue(&self, today: NaiveDate, grace_days: u32) -> bool {
        if self.payment_status == PaymentStatus::UnPaid {
            return false;
        }
        let cutoff = overdue_cutoff(today, grace_days);
        self.last_payment_date.is_none_or(|date| date < cutoff)
    }
}

/// The earliest payment date that still counts as on time.
///
/// Payments made strictly before the returned date are overdue.
pub fn overdue_cutoff(today: NaiveDate, grace_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(grace_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// An entry of the staff audit trail
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StaffAction {
    /// Unique identifier for the entry
    pub id: i64,
    /// Business the affected staff member belongs to
    pub business_id: i64,
    /// Affected staff member
    pub staff_id: i64,
    /// Kind of action, e.g. `status_change`
    pub action_type: String,
    /// New value set by the action
    pub action_value: Option<String>,
    /// Human readable justification
    pub reason: Option<String>,
    /// Actor who performed the action
    pub performed_by: String,
    /// Role of the actor
    pub performed_by_role: String,
    /// Timestamp when the entry was appended
    pub created_at: DateTime<Utc>,
}
