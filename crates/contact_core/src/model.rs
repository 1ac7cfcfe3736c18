use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Email,
    Social,
}

/// Unverified contact pulled from a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactCandidate {
    pub target_id: TargetId,
    pub kind: CandidateKind,
    pub raw_value: String,
}

impl ContactCandidate {
    pub fn email(target_id: impl Into<TargetId>, value: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            kind: CandidateKind::Email,
            raw_value: value.into(),
        }
    }

    pub fn social(target_id: impl Into<TargetId>, value: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            kind: CandidateKind::Social,
            raw_value: value.into(),
        }
    }
}

/// Verification stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Format,
    Domain,
    Mx,
    Spf,
    Dkim,
    Smtp,
}

impl StageKind {
    pub const ORDER: [StageKind; 6] = [
        StageKind::Format,
        StageKind::Domain,
        StageKind::Mx,
        StageKind::Spf,
        StageKind::Dkim,
        StageKind::Smtp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Format => "format",
            StageKind::Domain => "domain",
            StageKind::Mx => "mx",
            StageKind::Spf => "spf",
            StageKind::Dkim => "dkim",
            StageKind::Smtp => "smtp",
        }
    }

    pub fn touches_network(self) -> bool {
        !matches!(self, StageKind::Format)
    }

    /// Informational stages annotate a result but never decide the verdict.
    pub fn is_informational(self) -> bool {
        matches!(self, StageKind::Spf | StageKind::Dkim)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Valid => "valid",
            Verdict::Invalid => "invalid",
            Verdict::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    BadFormat,
    DomainUnresolvable,
    NoMx,
    MailboxRejected,
    MailboxAccepted,
    DomainAcceptsMail,
    SmtpDeferred,
    SmtpPolicyBlock,
    SmtpUnreachable,
    DnsFailure,
    TimeoutAtDomain,
    TimeoutAtMx,
    TimeoutAtSmtp,
}

impl ReasonCode {
    /// Reason for a timeout at a verdict-bearing network stage.
    pub fn timeout_at(stage: StageKind) -> Option<ReasonCode> {
        match stage {
            StageKind::Domain => Some(ReasonCode::TimeoutAtDomain),
            StageKind::Mx => Some(ReasonCode::TimeoutAtMx),
            StageKind::Smtp => Some(ReasonCode::TimeoutAtSmtp),
            StageKind::Format | StageKind::Spf | StageKind::Dkim => None,
        }
    }

    /// Reason recorded when every stage up to `last` passed.
    pub fn passed_through(last: StageKind) -> ReasonCode {
        if last == StageKind::Smtp {
            ReasonCode::MailboxAccepted
        } else {
            ReasonCode::DomainAcceptsMail
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::BadFormat => "bad_format",
            ReasonCode::DomainUnresolvable => "domain_unresolvable",
            ReasonCode::NoMx => "no_mx",
            ReasonCode::MailboxRejected => "mailbox_rejected",
            ReasonCode::MailboxAccepted => "mailbox_accepted",
            ReasonCode::DomainAcceptsMail => "domain_accepts_mail",
            ReasonCode::SmtpDeferred => "smtp_deferred",
            ReasonCode::SmtpPolicyBlock => "smtp_policy_block",
            ReasonCode::SmtpUnreachable => "smtp_unreachable",
            ReasonCode::DnsFailure => "dns_failure",
            ReasonCode::TimeoutAtDomain => "timeout_at_domain",
            ReasonCode::TimeoutAtMx => "timeout_at_mx",
            ReasonCode::TimeoutAtSmtp => "timeout_at_smtp",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence in a verdict, lowered by each informational finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_annotations(count: usize) -> Self {
        match count {
            0 => Confidence::High,
            1 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub email: String,
    pub stage_reached: StageKind,
    pub verdict: Verdict,
    pub reason: ReasonCode,
    #[serde(default)]
    pub annotations: Vec<String>,
    pub confidence: Confidence,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn new(
        email: impl Into<String>,
        stage_reached: StageKind,
        verdict: Verdict,
        reason: ReasonCode,
        annotations: Vec<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email: email.into(),
            stage_reached,
            verdict,
            reason,
            confidence: Confidence::from_annotations(annotations.len()),
            annotations,
            checked_at,
        }
    }

    pub fn is_definitive(&self) -> bool {
        self.verdict != Verdict::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub result: VerificationResult,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// One output record per successfully processed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub target_id: TargetId,
    pub url: String,
    pub source_row: usize,
    pub emails: Vec<VerificationResult>,
    pub social_links: Vec<String>,
    #[serde(default)]
    pub passthrough: BTreeMap<String, String>,
}

/// Cache key for an email: trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
