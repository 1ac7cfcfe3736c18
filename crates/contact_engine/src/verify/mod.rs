//! Staged email verification.
//!
//! Stages run in list order until one fails (verdict `invalid`), one is
//! inconclusive (verdict `unknown`) or the list is exhausted (verdict `valid`).
//! SPF and DKIM only ever add annotations.
mod dns;
mod smtp;
mod stages;

use std::sync::Arc;
use std::time::Duration;

use contact_core::{
    normalize_email, PipelineConfig, ReasonCode, StageKind, StageTimeouts, Verdict,
    VerificationResult,
};
use contact_logging::{contact_debug, contact_trace};

use crate::cache::CacheStore;
use crate::persist::StoreError;
use crate::rate_limit::HostRateLimiter;
use crate::time::{system_clock, UtcClock};

pub use dns::{DnsError, DnsResolver, MxRecord, SystemDnsResolver};
pub use smtp::{SmtpError, SmtpProber, SmtpReply, SmtpSettings, SmtpStep, TcpSmtpProber};
pub use stages::{
    DkimStage, DomainStage, FormatStage, MxStage, SmtpStage, SpfStage, DEFAULT_DKIM_SELECTORS,
};

/// State shared by the stages of one verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub email: String,
    pub local_part: String,
    pub domain: String,
    /// Usable mail exchangers, most preferred first.
    pub mail_hosts: Vec<MxRecord>,
}

impl StageContext {
    pub fn new(email: &str) -> Self {
        let (local_part, domain) = email.rsplit_once('@').unwrap_or((email, ""));
        Self {
            email: email.to_string(),
            local_part: local_part.to_string(),
            domain: domain.to_string(),
            mail_hosts: Vec::new(),
        }
    }

    pub fn set_mail_hosts(&mut self, records: Vec<MxRecord>) {
        self.mail_hosts = stages::usable_mail_hosts(records);
    }

    /// Host to probe: the best mail exchanger, else the domain itself.
    pub fn smtp_host(&self) -> &str {
        self.mail_hosts
            .first()
            .map(|mx| mx.exchange.trim_end_matches('.'))
            .unwrap_or(&self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Pass,
    /// Passed, with a finding worth recording.
    Advisory(String),
    Fail(ReasonCode),
    Inconclusive(ReasonCode),
}

#[async_trait::async_trait]
pub trait VerificationStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Wait for permission to run. Not counted against the stage timeout.
    async fn admit(&self, _ctx: &StageContext) {}

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome;
}

/// The standard stage list: format, domain, MX, SPF, DKIM, SMTP.
pub fn default_stages(
    resolver: Arc<dyn DnsResolver>,
    prober: Arc<dyn SmtpProber>,
    limiter: Arc<HostRateLimiter>,
) -> Vec<Box<dyn VerificationStage>> {
    vec![
        Box::new(FormatStage),
        Box::new(DomainStage::new(resolver.clone())),
        Box::new(MxStage::new(resolver.clone())),
        Box::new(SpfStage::new(resolver.clone())),
        Box::new(DkimStage::new(resolver)),
        Box::new(SmtpStage::new(prober, limiter)),
    ]
}

pub struct EmailVerifier {
    stages: Vec<Box<dyn VerificationStage>>,
    cache: Arc<CacheStore>,
    timeouts: StageTimeouts,
    ttl_definitive: Duration,
    ttl_unknown: Duration,
    clock: UtcClock,
}

impl EmailVerifier {
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        prober: Arc<dyn SmtpProber>,
        limiter: Arc<HostRateLimiter>,
        cache: Arc<CacheStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self::with_stages(default_stages(resolver, prober, limiter), cache, config)
    }

    pub fn with_stages(
        stages: Vec<Box<dyn VerificationStage>>,
        cache: Arc<CacheStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            stages,
            cache,
            timeouts: config.stage_timeouts.clone(),
            ttl_definitive: config.cache_ttl_valid(),
            ttl_unknown: config.cache_ttl_unknown(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: UtcClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Verify through the cache; only a storage failure is an error.
    pub async fn verify(&self, email: &str) -> Result<VerificationResult, StoreError> {
        let email = normalize_email(email);
        let (definitive, unknown) = (self.ttl_definitive, self.ttl_unknown);
        let ttl_for = move |result: &VerificationResult| {
            if result.is_definitive() {
                definitive
            } else {
                unknown
            }
        };
        self.cache
            .get_or_verify(&email, ttl_for, || self.run_stages(&email))
            .await
    }

    /// Run every stage without consulting the cache.
    pub async fn run_stages(&self, email: &str) -> VerificationResult {
        let mut ctx = StageContext::new(email);
        let mut annotations = Vec::new();
        let mut reached = StageKind::Format;

        for stage in &self.stages {
            let kind = stage.kind();
            reached = kind;
            stage.admit(&ctx).await;
            let outcome = match self.timeouts.for_stage(kind) {
                Some(limit) => tokio::time::timeout(limit, stage.check(&mut ctx))
                    .await
                    .unwrap_or_else(|_| timed_out(kind)),
                None => stage.check(&mut ctx).await,
            };
            contact_trace!("{} at {}: {:?}", email, kind, outcome);

            match outcome {
                StageOutcome::Pass => {}
                StageOutcome::Advisory(note) => annotations.push(note),
                StageOutcome::Fail(reason) | StageOutcome::Inconclusive(reason)
                    if kind.is_informational() =>
                {
                    annotations.push(reason.as_str().to_string());
                }
                StageOutcome::Fail(reason) => {
                    return self.conclude(email, kind, Verdict::Invalid, reason, annotations)
                }
                StageOutcome::Inconclusive(reason) => {
                    return self.conclude(email, kind, Verdict::Unknown, reason, annotations)
                }
            }
        }

        let reason = ReasonCode::passed_through(reached);
        self.conclude(email, reached, Verdict::Valid, reason, annotations)
    }

    fn conclude(
        &self,
        email: &str,
        stage: StageKind,
        verdict: Verdict,
        reason: ReasonCode,
        annotations: Vec<String>,
    ) -> VerificationResult {
        contact_debug!("Verified {}: {} ({}) at {}", email, verdict, reason, stage);
        VerificationResult::new(email, stage, verdict, reason, annotations, (self.clock)())
    }
}

fn timed_out(stage: StageKind) -> StageOutcome {
    match ReasonCode::timeout_at(stage) {
        Some(reason) => StageOutcome::Inconclusive(reason),
        None => StageOutcome::Advisory(format!("timeout_at_{stage}")),
    }
}
