//! Report data generation and PDF rendering.

use crate::errors::RenderError;
use crate::schema::{PaymentStatus, Report, overdue_cutoff};
use crate::storage;
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

/// Maximum number of detail rows printed on the single PDF page.
const PDF_MAX_ROWS: usize = 40;

/// Structured data of a generated report.
///
/// This is what gets written verbatim for `json` reports, and what
/// [`ReportRenderer::render_pdf`] lays out for `pdf` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    /// Title of the report
    pub title: String,
    /// Business the report covers
    pub business_id: i64,
    /// Timestamp when the data was generated
    pub generated_at: DateTime<Utc>,
    /// Summary totals, keyed by label
    pub totals: BTreeMap<String, i64>,
    /// Detail rows
    pub rows: Vec<Value>,
}

/// Turns report requests into structured data and rendered documents.
pub trait ReportRenderer: Send + Sync + 'static {
    /// Produce the structured data for a report request.
    fn generate(
        &self,
        report: &Report,
    ) -> impl Future<Output = Result<ReportData, RenderError>> + Send;

    /// Write `data` as a PDF document at `path`.
    ///
    /// Called from a blocking thread, so synchronous file I/O is fine here.
    fn render_pdf(&self, data: &ReportData, path: &Path) -> Result<(), RenderError> {
        write_pdf(data, path)
    }
}

/// Parameters understood by [`StaffPaymentRenderer`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaffReportParams {
    title: Option<String>,
    payment_status: Option<PaymentStatus>,
}

/// Summarizes the payment standing of a business's staff.
///
/// Accepted params: `{"title": "...", "payment_status": "paid" | "un_paid"}`,
/// both optional.
#[derive(Debug, Clone)]
pub struct StaffPaymentRenderer {
    pool: PgPool,
    grace_days: u32,
}

impl StaffPaymentRenderer {
    /// Create a renderer reading staff data from the given pool.
    pub fn new(pool: PgPool, grace_days: u32) -> Self {
        Self { pool, grace_days }
    }
}

impl ReportRenderer for StaffPaymentRenderer {
    async fn generate(&self, report: &Report) -> Result<ReportData, RenderError> {
        let params = if report.params.is_null() {
            StaffReportParams::default()
        } else {
            serde_json::from_value::<StaffReportParams>(report.params.clone())
                .map_err(RenderError::InvalidParams)?
        };

        let staff = storage::list_staff(&self.pool, report.business_id, params.payment_status).await?;

        let generated_at = Utc::now();
        let today = generated_at.date_naive();
        let cutoff = overdue_cutoff(today, self.grace_days);

        let mut totals = BTreeMap::from([
            ("staff_total".to_string(), 0),
            ("paid".to_string(), 0),
            ("un_paid".to_string(), 0),
            ("overdue".to_string(), 0),
            ("never_paid".to_string(), 0),
        ]);
        let mut rows = Vec::with_capacity(staff.len());

        for record in &staff {
            let overdue = record.is_overdue(today, self.grace_days);
            let counters = [
                Some("staff_total"),
                Some(record.payment_status.as_str()),
                overdue.then_some("overdue"),
                record.last_payment_date.is_none().then_some("never_paid"),
            ];
            for key in counters.into_iter().flatten() {
                *totals.entry(key.to_string()).or_default() += 1;
            }

            rows.push(serde_json::json!({
                "staff_id": record.staff_id,
                "payment_status": record.payment_status,
                "last_payment_date": record.last_payment_date,
                "overdue": overdue,
            }));
        }

        let title = params
            .title
            .unwrap_or_else(|| format!("Staff payment report for business {}", report.business_id));

        tracing::debug!(
            report.id = report.id,
            staff.count = staff.len(),
            %cutoff,
            "Generated staff payment report data"
        );

        Ok(ReportData {
            title,
            business_id: report.business_id,
            generated_at,
            totals,
            rows,
        })
    }
}

/// Write a single-page PDF containing the title, summary totals, and as many
/// detail rows as fit on the page.
pub fn write_pdf(data: &ReportData, path: &Path) -> Result<(), RenderError> {
    let mut lines = vec![
        (10, format!("Business: {}", data.business_id)),
        (
            10,
            format!("Generated: {}", data.generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ),
        (10, String::new()),
        (12, "Summary".to_string()),
    ];
    lines.extend(
        data.totals
            .iter()
            .map(|(label, total)| (10, format!("  {label}: {total}"))),
    );

    if !data.rows.is_empty() {
        lines.push((10, String::new()));
        lines.push((12, "Details".to_string()));
        lines.extend(
            data.rows
                .iter()
                .take(PDF_MAX_ROWS)
                .map(|row| (9, format!("  {}", describe_row(row)))),
        );
        if data.rows.len() > PDF_MAX_ROWS {
            lines.push((
                9,
                format!("  ... and {} more", data.rows.len() - PDF_MAX_ROWS),
            ));
        }
    }

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), Object::Integer(16)]),
        Operation::new("Td", vec![Object::Integer(50), Object::Integer(790)]),
        Operation::new("Tj", vec![Object::string_literal(pdf_text(&data.title))]),
    ];
    for (size, text) in lines {
        operations.push(Operation::new("Tf", vec!["F1".into(), Object::Integer(size)]));
        operations.push(Operation::new(
            "Td",
            vec![Object::Integer(0), Object::Integer(-(size + 6))],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(pdf_text(&text))]));
    }
    operations.push(Operation::new("ET", vec![]));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => Object::Integer(1),
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(595),
            Object::Integer(842),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(path)?;
    Ok(())
}

/// Encodes text for the WinAnsi-encoded Courier font.
///
/// Latin-1 characters map to their own byte. Anything else becomes `?`.
fn pdf_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            code @ (0x20..=0x7E | 0xA0..=0xFF) => u8::try_from(code).unwrap_or(b'?'),
            _ => b'?',
        })
        .collect()
}

fn describe_row(row: &Value) -> String {
    match row {
        Value::Object(fields) => fields
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join("  "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data(rows: usize) -> ReportData {
        ReportData {
            title: "Quarterly staff report".to_string(),
            business_id: 42,
            generated_at: Utc::now(),
            totals: BTreeMap::from([("paid".to_string(), 3), ("un_paid".to_string(), 1)]),
            rows: (0..rows)
                .map(|i| serde_json::json!({ "staff_id": i, "payment_status": "paid" }))
                .collect(),
        }
    }

    #[test]
    fn pdf_contains_title_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report_1.pdf");

        write_pdf(&sample_data(2), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("(Quarterly staff report) Tj"));
        assert!(text.contains("(  paid: 3) Tj"));
        assert!(text.contains("(  un_paid: 1) Tj"));

        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn pdf_truncates_long_detail_listings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report_2.pdf");

        write_pdf(&sample_data(PDF_MAX_ROWS + 7), &path).unwrap();

        let text = String::from_utf8_lossy(&std::fs::read(&path).unwrap()).into_owned();
        assert!(text.contains("... and 7 more"));
    }

    #[test]
    fn text_is_encoded_as_latin1() {
        assert_eq!(pdf_text("Payroll 2025"), b"Payroll 2025".to_vec());
        assert_eq!(pdf_text("Caf\u{e9} Gr\u{f6}\u{df}e"), b"Caf\xe9 Gr\xf6\xdfe".to_vec());
        assert_eq!(pdf_text("Zahlungen \u{2713} \u{65e5}\u{672c}"), b"Zahlungen ? ??".to_vec());
    }

    #[test]
    fn pdf_declares_winansi_font_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report_4.pdf");

        let mut data = sample_data(0);
        data.title = "R\u{e9}sum\u{e9} \u{2713}".to_string();
        write_pdf(&data, &path).unwrap();

        let doc = Document::load(&path).unwrap();
        let fonts = doc
            .objects
            .values()
            .filter_map(|object| object.as_dict().ok())
            .filter(|dict| dict.get(b"Type").and_then(Object::as_name).ok() == Some(b"Font".as_slice()))
            .collect::<Vec<_>>();
        assert_eq!(fonts.len(), 1);
        assert_eq!(
            fonts[0].get(b"Encoding").and_then(Object::as_name).unwrap(),
            b"WinAnsiEncoding"
        );
    }

    #[test]
    fn rows_are_described_as_key_value_pairs() {
        let row = serde_json::json!({ "staff_id": 7, "payment_status": "un_paid" });
        assert_eq!(describe_row(&row), "payment_status=un_paid  staff_id=7");
    }

    #[test]
    fn pdf_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report_3.pdf");

        let error = write_pdf(&sample_data(0), &path).unwrap_err();
        assert!(matches!(error, RenderError::Io(_) | RenderError::Pdf(_)));
    }
}
