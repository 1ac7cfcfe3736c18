use std::fmt;

use contact_core::{ContactRecord, FailureReason, TargetId};

/// Rendered page content handed to the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub original_url: String,
    pub final_url: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PageFetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl PageFetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RenderTimeout,
    Dns,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Decode,
    Network,
}

impl FailureKind {
    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureKind::Timeout
            | FailureKind::RenderTimeout
            | FailureKind::Dns
            | FailureKind::Network => true,
            FailureKind::HttpStatus(code) => matches!(code, 408 | 429 | 500..=599),
            FailureKind::InvalidUrl
            | FailureKind::RedirectLimitExceeded
            | FailureKind::TooLarge { .. }
            | FailureKind::UnsupportedContentType { .. }
            | FailureKind::Decode => false,
        }
    }

    /// Checkpoint reason for a target whose fetch never succeeded.
    pub fn failure_reason(&self, retries_exhausted: bool) -> FailureReason {
        match self {
            FailureKind::InvalidUrl => FailureReason::InvalidUrl,
            FailureKind::Dns if retries_exhausted => FailureReason::UnreachableDomain,
            _ if retries_exhausted => FailureReason::RetriesExhausted,
            _ => FailureReason::PermanentFetchError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RenderTimeout => write!(f, "render timeout"),
            FailureKind::Dns => write!(f, "dns failure"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Decode => write!(f, "undecodable body"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Progress notifications emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    TargetStarted {
        target_id: TargetId,
        attempt: u32,
    },
    TargetRetrying {
        target_id: TargetId,
        attempt: u32,
        delay_ms: u64,
        error: PageFetchError,
    },
    /// Output record; replayed for targets completed by an earlier run.
    TargetCompleted {
        record: ContactRecord,
        resumed: bool,
    },
    TargetFailed {
        target_id: TargetId,
        reason: FailureReason,
        message: String,
    },
}
