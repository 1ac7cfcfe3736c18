//! Contact core: pure data model, checkpoint transitions and run policy.
//!
//! Nothing in this crate performs IO; the engine crate drives these types.
mod backoff;
mod checkpoint;
mod config;
mod control;
mod model;
mod summary;
mod target;

pub use backoff::BackoffPolicy;
pub use checkpoint::{
    CheckpointEntry, CheckpointStatus, Completion, FailureReason, FailureRecord, TransitionError,
};
pub use config::{BackoffConfig, ConfigError, PipelineConfig, StageTimeouts};
pub use control::StopPolicy;
pub use model::{
    normalize_email, CacheEntry, CandidateKind, Confidence, ContactCandidate, ContactRecord,
    ReasonCode, StageKind, Verdict, VerificationResult,
};
pub use summary::RunSummary;
pub use target::{host_key, normalize_url, target_id, Target, TargetId};
