use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ContactRecord, Target, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Done => "done",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidUrl,
    PermanentFetchError,
    RetriesExhausted,
    UnreachableDomain,
    WorkerPanic,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::InvalidUrl => "invalid_url",
            FailureReason::PermanentFetchError => "permanent_fetch_error",
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::UnreachableDomain => "unreachable_domain",
            FailureReason::WorkerPanic => "worker_panic",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: FailureReason,
    pub message: String,
}

impl FailureRecord {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("target {target_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub target_id: TargetId,
    pub from: CheckpointStatus,
    pub to: CheckpointStatus,
}

/// Outcome of completing an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Recorded,
    /// Already done with an identical record; nothing to persist.
    Unchanged,
    /// Already done; the newer record replaced the stored one.
    Replaced,
}

/// Durable progress marker of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub target_id: TargetId,
    pub url: String,
    pub status: CheckpointStatus,
    pub attempts: u32,
    pub last_error: Option<FailureRecord>,
    pub record: Option<ContactRecord>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointEntry {
    pub fn new(target: &Target, now: DateTime<Utc>) -> Self {
        Self {
            target_id: target.id.clone(),
            url: target.url.clone(),
            status: CheckpointStatus::Pending,
            attempts: 0,
            last_error: None,
            record: None,
            updated_at: now,
        }
    }

    /// Start (or restart) an attempt. Done targets are never re-dispatched.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status == CheckpointStatus::Done {
            return Err(self.invalid(CheckpointStatus::InProgress));
        }
        self.status = CheckpointStatus::InProgress;
        self.attempts += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(
        &mut self,
        record: ContactRecord,
        now: DateTime<Utc>,
    ) -> Result<Completion, TransitionError> {
        match self.status {
            CheckpointStatus::InProgress => {
                self.status = CheckpointStatus::Done;
                self.record = Some(record);
                self.last_error = None;
                self.updated_at = now;
                Ok(Completion::Recorded)
            }
            CheckpointStatus::Done if self.record.as_ref() == Some(&record) => {
                Ok(Completion::Unchanged)
            }
            CheckpointStatus::Done => {
                self.record = Some(record);
                self.updated_at = now;
                Ok(Completion::Replaced)
            }
            CheckpointStatus::Pending | CheckpointStatus::Failed => {
                Err(self.invalid(CheckpointStatus::Done))
            }
        }
    }

    pub fn fail(
        &mut self,
        failure: FailureRecord,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != CheckpointStatus::InProgress {
            return Err(self.invalid(CheckpointStatus::Failed));
        }
        self.status = CheckpointStatus::Failed;
        self.last_error = Some(failure);
        self.updated_at = now;
        Ok(())
    }

    /// Crash recovery: an interrupted attempt goes back to pending.
    pub fn recover(&mut self) -> bool {
        if self.status == CheckpointStatus::InProgress {
            self.status = CheckpointStatus::Pending;
            true
        } else {
            false
        }
    }

    fn invalid(&self, to: CheckpointStatus) -> TransitionError {
        TransitionError {
            target_id: self.target_id.clone(),
            from: self.status,
            to,
        }
    }
}
