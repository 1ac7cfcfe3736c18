use std::collections::BTreeMap;

use serde::Serialize;

use crate::{ContactRecord, FailureReason};

/// Per-run status counts reported when a run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Targets completed during this run.
    pub done: usize,
    /// Targets already done before the run; replayed without network work.
    pub resumed: usize,
    pub failed: usize,
    pub failure_reasons: BTreeMap<String, usize>,
    pub verdicts: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn record_done(&mut self, record: &ContactRecord, resumed: bool) {
        if resumed {
            self.resumed += 1;
        } else {
            self.done += 1;
        }
        for email in &record.emails {
            *self
                .verdicts
                .entry(email.verdict.as_str().to_string())
                .or_default() += 1;
        }
    }

    pub fn record_failed(&mut self, reason: FailureReason) {
        self.failed += 1;
        *self
            .failure_reasons
            .entry(reason.as_str().to_string())
            .or_default() += 1;
    }

    pub fn total(&self) -> usize {
        self.done + self.resumed + self.failed
    }
}
