use std::net::IpAddr;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    #[error("no records for {0}")]
    NotFound(String),
    #[error("lookup of {0} timed out")]
    Timeout(String),
    #[error("lookup failed: {0}")]
    Failure(String),
}

/// Name-resolution capability used by the verifier stages.
#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, DnsError>;
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError>;
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// [`DnsResolver`] backed by `trust-dns-resolver`.
pub struct SystemDnsResolver {
    resolver: TokioAsyncResolver,
}

impl SystemDnsResolver {
    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Resolver configured from `/etc/resolv.conf` (or the platform equivalent).
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|err| DnsError::Failure(err.to_string()))?;
        Ok(Self { resolver })
    }
}

impl Default for SystemDnsResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default(), ResolverOpts::default())
    }
}

#[async_trait::async_trait]
impl DnsResolver for SystemDnsResolver {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|err| map_resolve_error(name, err))?;
        Ok(lookup.iter().collect())
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        let lookup = self
            .resolver
            .mx_lookup(domain)
            .await
            .map_err(|err| map_resolve_error(domain, err))?;
        Ok(lookup
            .iter()
            .map(|mx| MxRecord {
                preference: mx.preference(),
                exchange: mx.exchange().to_utf8(),
            })
            .collect())
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|err| map_resolve_error(name, err))?;
        Ok(lookup
            .iter()
            .map(|txt| {
                // A TXT record may be split into several character strings.
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect::<String>()
            })
            .collect())
    }
}

fn map_resolve_error(name: &str, err: ResolveError) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound(name.to_string()),
        ResolveErrorKind::Timeout => DnsError::Timeout(name.to_string()),
        _ => DnsError::Failure(err.to_string()),
    }
}
