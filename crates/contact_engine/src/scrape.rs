use std::sync::Arc;
use std::time::Duration;

use contact_core::{CandidateKind, ContactCandidate, Target};
use contact_logging::contact_debug;

use crate::extract::ContactExtractor;
use crate::fetch::PageRenderer;
use crate::{FailureKind, PageFetchError};

/// Result of scraping one target. Fetch failures are data, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub candidates: Vec<ContactCandidate>,
    pub page_fetch_error: Option<PageFetchError>,
}

impl ScrapeOutcome {
    fn failed(error: PageFetchError) -> Self {
        Self {
            candidates: Vec::new(),
            page_fetch_error: Some(error),
        }
    }

    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.of_kind(CandidateKind::Email)
    }

    pub fn social_links(&self) -> impl Iterator<Item = &str> {
        self.of_kind(CandidateKind::Social)
    }

    fn of_kind(&self, kind: CandidateKind) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter(move |candidate| candidate.kind == kind)
            .map(|candidate| candidate.raw_value.as_str())
    }
}

pub struct PageScraper {
    renderer: Arc<dyn PageRenderer>,
    extractor: ContactExtractor,
    render_timeout: Duration,
}

impl PageScraper {
    pub fn new(renderer: Arc<dyn PageRenderer>, render_timeout: Duration) -> Self {
        Self {
            renderer,
            extractor: ContactExtractor::new(),
            render_timeout,
        }
    }

    pub async fn fetch(&self, target: &Target) -> ScrapeOutcome {
        let Some(url) = target.fetch_url() else {
            return ScrapeOutcome::failed(PageFetchError::new(
                FailureKind::InvalidUrl,
                format!("cannot fetch {:?}", target.url),
            ));
        };

        let page = match tokio::time::timeout(self.render_timeout, self.renderer.render(&url)).await
        {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => return ScrapeOutcome::failed(err),
            Err(_) => {
                return ScrapeOutcome::failed(PageFetchError::new(
                    FailureKind::RenderTimeout,
                    format!("no page within {:?}", self.render_timeout),
                ))
            }
        };

        let contacts = self.extractor.extract(&page.html);
        contact_debug!(
            "Scraped {} ({} emails, {} social links)",
            page.final_url,
            contacts.emails.len(),
            contacts.social_links.len()
        );

        let candidates = contacts
            .emails
            .into_iter()
            .map(|email| ContactCandidate::email(target.id.clone(), email))
            .chain(
                contacts
                    .social_links
                    .into_iter()
                    .map(|link| ContactCandidate::social(target.id.clone(), link)),
            )
            .collect();

        ScrapeOutcome {
            candidates,
            page_fetch_error: None,
        }
    }
}
