use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::decode::decode_body;
use crate::{FailureKind, PageFetchError, RenderedPage};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub user_agent: String,
    pub allowed_content_types: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            user_agent: concat!("contact-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "text/plain".to_string(),
            ],
        }
    }
}

/// Capability that turns a URL into rendered page content.
///
/// A headless browser plugs in here; [`HttpPageRenderer`] covers static pages.
#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, PageFetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpPageRenderer {
    settings: FetchSettings,
    client: reqwest::Client,
}

impl HttpPageRenderer {
    pub fn new(settings: FetchSettings) -> Result<Self, PageFetchError> {
        let redirect_limit = settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(policy)
            .build()
            .map_err(|err| PageFetchError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self { settings, client })
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    fn too_large(&self, actual: u64) -> PageFetchError {
        PageFetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, PageFetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| PageFetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .header(USER_AGENT, self.settings.user_agent.as_str())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageFetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(PageFetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        let html = decode_body(&bytes, content_type.as_deref())?;
        Ok(RenderedPage {
            original_url: url.to_string(),
            final_url,
            html,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> PageFetchError {
    if err.is_timeout() {
        return PageFetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return PageFetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    if err.is_connect() && looks_like_dns_failure(&err) {
        return PageFetchError::new(FailureKind::Dns, err.to_string());
    }
    PageFetchError::new(FailureKind::Network, err.to_string())
}

fn looks_like_dns_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&dyn std::error::Error> = Some(err);
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = current.source();
    }
    false
}
