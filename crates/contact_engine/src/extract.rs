use std::collections::HashSet;

use contact_core::host_key;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

const MAX_SOCIAL_URL_LEN: usize = 100;
const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

/// Contacts found on one page, deduplicated, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContacts {
    pub emails: Vec<String>,
    pub social_links: Vec<String>,
}

/// Pulls emails and social profile links out of rendered HTML.
///
/// Looks at anchor `href`s (including `mailto:`) and at the page text.
/// Social links come back as `host/path`, e.g. `linkedin.com/company/acme`.
#[derive(Debug, Clone)]
pub struct ContactExtractor {
    email_pattern: Regex,
    social_pattern: Regex,
    anchor_selector: Selector,
}

impl Default for ContactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactExtractor {
    pub fn new() -> Self {
        Self {
            email_pattern: Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}")
                .expect("static email pattern"),
            social_pattern: Regex::new(
                r#"(?i)\b(?:https?://)?(?:www\.|m\.)?(?:facebook|instagram|linkedin|twitter|x)\.com/[^\s"'<>]+"#,
            )
            .expect("static social pattern"),
            anchor_selector: Selector::parse("a[href]").expect("static selector"),
        }
    }

    pub fn extract(&self, html: &str) -> ExtractedContacts {
        let document = Html::parse_document(html);
        let mut collector = Collector::default();

        for anchor in document.select(&self.anchor_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if let Some(mailto) = strip_prefix_ignore_case(href, "mailto:") {
                let address = mailto.split('?').next().unwrap_or(mailto);
                self.collect_emails(address, &mut collector);
            } else if let Some(link) = normalize_social_link(href) {
                collector.push_social(link);
            }
        }

        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        self.collect_emails(&text, &mut collector);
        for found in self.social_pattern.find_iter(&text) {
            let raw = found.as_str().trim_end_matches(['.', ',', ';', ':', ')', ']']);
            if let Some(link) = normalize_social_link(raw) {
                collector.push_social(link);
            }
        }

        collector.finish()
    }

    fn collect_emails(&self, haystack: &str, collector: &mut Collector) {
        for found in self.email_pattern.find_iter(haystack) {
            let email = found.as_str().to_ascii_lowercase();
            if IMAGE_SUFFIXES.iter().any(|suffix| email.ends_with(suffix)) {
                continue;
            }
            collector.push_email(email);
        }
    }
}

#[derive(Default)]
struct Collector {
    seen: HashSet<String>,
    contacts: ExtractedContacts,
}

impl Collector {
    fn push_email(&mut self, email: String) {
        if self.seen.insert(format!("email:{email}")) {
            self.contacts.emails.push(email);
        }
    }

    fn push_social(&mut self, link: String) {
        if self.seen.insert(format!("social:{link}")) {
            self.contacts.social_links.push(link);
        }
    }

    fn finish(self) -> ExtractedContacts {
        self.contacts
    }
}

/// Recognise a social profile URL and return it as `host/path`.
///
/// Share buttons, intents and stories are not profiles and are dropped.
pub fn normalize_social_link(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() >= MAX_SOCIAL_URL_LEN {
        return None;
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = Url::parse(&with_scheme).ok()?;
    let host = host_key(parsed.host_str()?);
    let host = host.strip_prefix("m.").unwrap_or(&host).to_string();
    let path = parsed.path().trim_end_matches('/');
    if path.is_empty() {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    let is_profile = match host.as_str() {
        "facebook.com" => !lower.contains("share"),
        "instagram.com" => !lower.contains("share") && !lower.contains("stories"),
        "linkedin.com" => {
            (path.starts_with("/in/") || path.starts_with("/company/")) && !lower.contains("shar")
        }
        "x.com" | "twitter.com" => !lower.contains("share") && !lower.contains("intent"),
        _ => false,
    };
    is_profile.then(|| format!("{host}{path}"))
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}
