use contact_core::{ContactRecord, RunSummary, Target, VerificationResult};
use contact_logging::contact_info;

/// Build the output record of a finished target.
pub fn assemble_record(
    target: &Target,
    emails: Vec<VerificationResult>,
    social_links: Vec<String>,
) -> ContactRecord {
    ContactRecord {
        target_id: target.id.clone(),
        url: target.url.clone(),
        source_row: target.source_row,
        emails,
        social_links,
        passthrough: target.passthrough.clone(),
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Done records, including ones replayed from an earlier run, in input order.
    pub records: Vec<ContactRecord>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(mut records: Vec<ContactRecord>, summary: RunSummary) -> Self {
        records.sort_by(|a, b| {
            a.source_row
                .cmp(&b.source_row)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        Self { records, summary }
    }

    pub fn log_summary(&self) {
        let summary = &self.summary;
        contact_info!(
            "Run finished: {} done, {} resumed, {} failed",
            summary.done,
            summary.resumed,
            summary.failed
        );
        for (reason, count) in &summary.failure_reasons {
            contact_info!("  failed {}: {}", reason, count);
        }
        for (verdict, count) in &summary.verdicts {
            contact_info!("  emails {}: {}", verdict, count);
        }
    }
}
