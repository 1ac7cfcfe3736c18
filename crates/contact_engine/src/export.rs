use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use contact_core::ContactRecord;
use contact_logging::contact_info;

use crate::aggregate::RunReport;
use crate::persist::{ensure_dir, AtomicFileWriter, StoreError};

/// Fixed leading columns; passthrough columns follow in name order.
pub const RECORD_COLUMNS: [&str; 5] = [
    "url",
    "email",
    "verificationVerdict",
    "reasonCode",
    "socialLinks",
];

const SOCIAL_LINK_SEPARATOR: &str = "; ";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub records_filename: String,
    pub summary_filename: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            records_filename: "contacts.csv".to_string(),
            summary_filename: Some("summary.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub row_count: usize,
    pub records_path: PathBuf,
    pub summary_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Write one row per email; a record without emails still gets one row.
///
/// Returns the number of data rows written.
pub fn write_records_csv<W: Write>(out: W, records: &[ContactRecord]) -> Result<usize, ExportError> {
    let passthrough: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.passthrough.keys().map(String::as_str))
        .filter(|column| !RECORD_COLUMNS.contains(column))
        .collect();

    let mut wtr = csv::WriterBuilder::new().from_writer(out);
    wtr.write_record(RECORD_COLUMNS.iter().copied().chain(passthrough.iter().copied()))?;

    let mut rows = 0usize;
    for record in records {
        let social = record.social_links.join(SOCIAL_LINK_SEPARATOR);
        let extra: Vec<&str> = passthrough
            .iter()
            .map(|column| {
                record
                    .passthrough
                    .get(*column)
                    .map(String::as_str)
                    .unwrap_or_default()
            })
            .collect();

        if record.emails.is_empty() {
            let fixed = [record.url.as_str(), "", "", "", social.as_str()];
            wtr.write_record(fixed.iter().copied().chain(extra.iter().copied()))?;
            rows += 1;
            continue;
        }
        for email in &record.emails {
            let fixed = [
                record.url.as_str(),
                email.email.as_str(),
                email.verdict.as_str(),
                email.reason.as_str(),
                social.as_str(),
            ];
            wtr.write_record(fixed.iter().copied().chain(extra.iter().copied()))?;
            rows += 1;
        }
    }
    wtr.flush()?;
    Ok(rows)
}

/// Write the records CSV and the run summary into `output_dir`, each atomically.
pub fn export_records(
    output_dir: &Path,
    report: &RunReport,
    options: ExportOptions,
) -> Result<ExportSummary, ExportError> {
    let mut buffer = Vec::new();
    let row_count = write_records_csv(&mut buffer, &report.records)?;

    ensure_dir(output_dir)?;
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());
    let records_path = writer.write(&options.records_filename, &buffer)?;
    let summary_path = match options.summary_filename {
        Some(name) => Some(writer.write_json(&name, &report.summary)?),
        None => None,
    };

    contact_info!(
        "Exported {} rows for {} records to {:?}",
        row_count,
        report.records.len(),
        records_path
    );
    Ok(ExportSummary {
        row_count,
        records_path,
        summary_path,
    })
}
