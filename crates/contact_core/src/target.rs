use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Stable identifier of a target: hex of the first 16 bytes of SHA-256 over the normalized URL.
pub type TargetId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub url: String,
    pub source_row: usize,
    #[serde(default)]
    pub passthrough: BTreeMap<String, String>,
}

impl Target {
    pub fn new(url: impl Into<String>, source_row: usize) -> Self {
        let url = url.into().trim().to_string();
        Self {
            id: target_id(&url),
            url,
            source_row,
            passthrough: BTreeMap::new(),
        }
    }

    pub fn with_passthrough(mut self, passthrough: BTreeMap<String, String>) -> Self {
        self.passthrough = passthrough;
        self
    }

    /// URL to fetch, or `None` when the target cannot be fetched at all.
    pub fn fetch_url(&self) -> Option<String> {
        normalize_url(&self.url)
    }

    /// Politeness key for the target's host.
    pub fn host(&self) -> Option<String> {
        let normalized = self.fetch_url()?;
        let parsed = Url::parse(&normalized).ok()?;
        parsed.host_str().map(host_key)
    }
}

/// Normalize a user-supplied URL for identity and fetching.
///
/// Adds `http://` when no scheme is given, lowercases scheme and host, drops
/// the fragment and a trailing slash on the path; the query is left as
/// written. Only http(s) URLs with a host survive.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return None;
    }
    // Targets never carry credentials; this also rejects `mailto:user@host`.
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return None;
    }
    parsed.set_fragment(None);
    if let Some(trimmed) = parsed.path().strip_suffix('/') {
        let trimmed = trimmed.to_string();
        parsed.set_path(&trimmed);
    }

    let mut normalized = parsed.to_string();
    // A bare host still serializes with a `/` path.
    if parsed.path() == "/" && parsed.query().is_none() {
        normalized.pop();
    }
    Some(normalized)
}

pub fn target_id(raw_url: &str) -> TargetId {
    let identity = normalize_url(raw_url).unwrap_or_else(|| raw_url.trim().to_string());
    let digest = Sha256::digest(identity.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Lowercase host without a leading `www.`; shared key for rate limiting.
pub fn host_key(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lower,
    }
}
