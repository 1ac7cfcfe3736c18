use std::sync::Arc;

use contact_core::{ReasonCode, StageKind};
use contact_logging::contact_debug;

use super::dns::{DnsError, DnsResolver, MxRecord};
use super::smtp::{SmtpError, SmtpProber, SmtpReply};
use super::{StageContext, StageOutcome, VerificationStage};
use crate::rate_limit::HostRateLimiter;

pub const DEFAULT_DKIM_SELECTORS: [&str; 6] =
    ["default", "google", "selector1", "selector2", "k1", "mail"];

const LOCAL_PART_MAX: usize = 64;
const DOMAIN_MAX: usize = 253;
const LABEL_MAX: usize = 63;

/// Syntax check; touches no network.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatStage;

#[async_trait::async_trait]
impl VerificationStage for FormatStage {
    fn kind(&self) -> StageKind {
        StageKind::Format
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        if is_valid_format(&ctx.email) {
            StageOutcome::Pass
        } else {
            StageOutcome::Fail(ReasonCode::BadFormat)
        }
    }
}

pub(crate) fn is_valid_format(email: &str) -> bool {
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    is_valid_local_part(local) && is_valid_domain(domain)
}

fn is_valid_local_part(local: &str) -> bool {
    if local.is_empty() || local.len() > LOCAL_PART_MAX {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || "!#$%&'*+-/=?^_`{|}~".contains(c))
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > DOMAIN_MAX {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= LABEL_MAX
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_lowercase()));
    labels_ok && tld_ok
}

/// The domain resolves to an address, or at least publishes mail exchangers.
pub struct DomainStage {
    resolver: Arc<dyn DnsResolver>,
}

impl DomainStage {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl VerificationStage for DomainStage {
    fn kind(&self) -> StageKind {
        StageKind::Domain
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        match self.resolver.lookup_host(&ctx.domain).await {
            Ok(addresses) if !addresses.is_empty() => return StageOutcome::Pass,
            Ok(_) | Err(DnsError::NotFound(_)) => {}
            Err(err) => return dns_inconclusive(err, ReasonCode::TimeoutAtDomain),
        }

        // No address records; a domain that only receives mail is still live.
        match self.resolver.lookup_mx(&ctx.domain).await {
            Ok(records) if !records.is_empty() => {
                ctx.set_mail_hosts(records);
                StageOutcome::Pass
            }
            Ok(_) | Err(DnsError::NotFound(_)) => {
                StageOutcome::Fail(ReasonCode::DomainUnresolvable)
            }
            Err(err) => dns_inconclusive(err, ReasonCode::TimeoutAtDomain),
        }
    }
}

pub struct MxStage {
    resolver: Arc<dyn DnsResolver>,
}

impl MxStage {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl VerificationStage for MxStage {
    fn kind(&self) -> StageKind {
        StageKind::Mx
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        if ctx.mail_hosts.is_empty() {
            match self.resolver.lookup_mx(&ctx.domain).await {
                Ok(records) => ctx.set_mail_hosts(records),
                Err(DnsError::NotFound(_)) => {}
                Err(err) => return dns_inconclusive(err, ReasonCode::TimeoutAtMx),
            }
        }
        if ctx.mail_hosts.is_empty() {
            StageOutcome::Fail(ReasonCode::NoMx)
        } else {
            StageOutcome::Pass
        }
    }
}

pub struct SpfStage {
    resolver: Arc<dyn DnsResolver>,
}

impl SpfStage {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl VerificationStage for SpfStage {
    fn kind(&self) -> StageKind {
        StageKind::Spf
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        let records = match self.resolver.lookup_txt(&ctx.domain).await {
            Ok(records) => records,
            Err(DnsError::NotFound(_)) => Vec::new(),
            Err(DnsError::Timeout(_)) => return StageOutcome::Advisory("timeout_at_spf".into()),
            Err(DnsError::Failure(_)) => {
                return StageOutcome::Advisory("spf_lookup_failed".into())
            }
        };
        match records.iter().filter(|txt| is_spf_record(txt)).count() {
            0 => StageOutcome::Advisory("spf_missing".into()),
            1 => StageOutcome::Pass,
            _ => StageOutcome::Advisory("spf_multiple_records".into()),
        }
    }
}

fn is_spf_record(txt: &str) -> bool {
    let txt = txt.trim().to_ascii_lowercase();
    txt == "v=spf1" || txt.starts_with("v=spf1 ")
}

pub struct DkimStage {
    resolver: Arc<dyn DnsResolver>,
    selectors: Vec<String>,
}

impl DkimStage {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self::with_selectors(resolver, DEFAULT_DKIM_SELECTORS.iter().map(|s| s.to_string()))
    }

    pub fn with_selectors(
        resolver: Arc<dyn DnsResolver>,
        selectors: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            resolver,
            selectors: selectors.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl VerificationStage for DkimStage {
    fn kind(&self) -> StageKind {
        StageKind::Dkim
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        for selector in &self.selectors {
            let name = format!("{selector}._domainkey.{}", ctx.domain);
            match self.resolver.lookup_txt(&name).await {
                Ok(records) if records.iter().any(|txt| is_dkim_record(txt)) => {
                    contact_debug!("DKIM key found at {}", name);
                    return StageOutcome::Pass;
                }
                Ok(_) | Err(DnsError::NotFound(_)) | Err(DnsError::Failure(_)) => {}
                Err(DnsError::Timeout(_)) => {
                    return StageOutcome::Advisory("timeout_at_dkim".into())
                }
            }
        }
        StageOutcome::Advisory("dkim_not_found".into())
    }
}

fn is_dkim_record(txt: &str) -> bool {
    let txt = txt.to_ascii_lowercase();
    txt.contains("v=dkim1") || txt.contains("p=")
}

/// Mailbox probe against the most preferred mail exchanger.
pub struct SmtpStage {
    prober: Arc<dyn SmtpProber>,
    limiter: Arc<HostRateLimiter>,
}

impl SmtpStage {
    pub fn new(prober: Arc<dyn SmtpProber>, limiter: Arc<HostRateLimiter>) -> Self {
        Self { prober, limiter }
    }
}

#[async_trait::async_trait]
impl VerificationStage for SmtpStage {
    fn kind(&self) -> StageKind {
        StageKind::Smtp
    }

    async fn admit(&self, ctx: &StageContext) {
        self.limiter.acquire(ctx.smtp_host()).await;
    }

    async fn check(&self, ctx: &mut StageContext) -> StageOutcome {
        let host = ctx.smtp_host().to_string();
        match self.prober.probe(&host, &ctx.email).await {
            Ok(reply) => {
                contact_debug!("SMTP {} answered {} for {}", host, reply.code, ctx.email);
                classify_reply(&reply)
            }
            Err(SmtpError::Timeout(_)) => StageOutcome::Inconclusive(ReasonCode::TimeoutAtSmtp),
            Err(err) => {
                contact_debug!("SMTP probe of {} failed: {}", host, err);
                StageOutcome::Inconclusive(ReasonCode::SmtpUnreachable)
            }
        }
    }
}

/// Only an answer to `RCPT TO` can reject the mailbox; a refusal earlier in
/// the session is a statement about us, not about the address.
pub(crate) fn classify_reply(reply: &SmtpReply) -> StageOutcome {
    if !reply.answers_mailbox() {
        return match reply.code {
            400..=499 => StageOutcome::Inconclusive(ReasonCode::SmtpDeferred),
            500..=599 => StageOutcome::Inconclusive(ReasonCode::SmtpPolicyBlock),
            _ => StageOutcome::Inconclusive(ReasonCode::SmtpUnreachable),
        };
    }
    match reply.code {
        250 | 251 => StageOutcome::Pass,
        550 | 551 | 553 => StageOutcome::Fail(ReasonCode::MailboxRejected),
        400..=499 => StageOutcome::Inconclusive(ReasonCode::SmtpDeferred),
        500..=599 => StageOutcome::Inconclusive(ReasonCode::SmtpPolicyBlock),
        _ => StageOutcome::Inconclusive(ReasonCode::SmtpUnreachable),
    }
}

fn dns_inconclusive(err: DnsError, timeout_reason: ReasonCode) -> StageOutcome {
    match err {
        DnsError::Timeout(_) => StageOutcome::Inconclusive(timeout_reason),
        DnsError::NotFound(_) | DnsError::Failure(_) => {
            StageOutcome::Inconclusive(ReasonCode::DnsFailure)
        }
    }
}

/// Records sorted by preference, null MX (`.`) entries removed.
pub(crate) fn usable_mail_hosts(mut records: Vec<MxRecord>) -> Vec<MxRecord> {
    records.retain(|mx| !mx.exchange.trim_end_matches('.').is_empty());
    records.sort_by_key(|mx| mx.preference);
    records
}
