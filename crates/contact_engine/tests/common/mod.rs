#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use contact_core::{PipelineConfig, StageTimeouts};
use contact_engine::verify::{
    DnsError, DnsResolver, MxRecord, SmtpError, SmtpProber, SmtpReply, SmtpStep,
};
use contact_engine::{
    EventSink, FailureKind, PageFetchError, PageRenderer, PipelineEvent, RenderedPage, Sleeper,
};

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_concurrent_workers: 4,
        per_host_min_interval_ms: 0,
        stage_timeouts: StageTimeouts::uniform(500),
        max_retry_attempts: 2,
        ..PipelineConfig::default()
    }
}

#[derive(Clone, Copy)]
enum DnsFault {
    Hang,
    Fail,
}

impl DnsFault {
    async fn apply<T>(self, name: &str) -> Result<T, DnsError> {
        match self {
            DnsFault::Hang => std::future::pending().await,
            DnsFault::Fail => Err(DnsError::Failure(format!("SERVFAIL for {name}"))),
        }
    }
}

/// Resolver answering from fixed tables; unknown names are `NotFound`.
#[derive(Default)]
pub struct StubDns {
    hosts: HashMap<String, Vec<IpAddr>>,
    mx: HashMap<String, Vec<MxRecord>>,
    txt: HashMap<String, Vec<String>>,
    host_fault: Option<DnsFault>,
    mx_fault: Option<DnsFault>,
    hang_txt: bool,
    calls: AtomicUsize,
}

impl StubDns {
    /// `domain` resolves, has one MX, an SPF record and a `default` DKIM key.
    pub fn healthy(domain: &str) -> Self {
        Self::default().with_healthy_domain(domain)
    }

    pub fn with_healthy_domain(mut self, domain: &str) -> Self {
        self.hosts.insert(
            domain.to_string(),
            vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))],
        );
        self.mx.insert(
            domain.to_string(),
            vec![MxRecord {
                preference: 10,
                exchange: format!("mx.{domain}."),
            }],
        );
        self.txt.insert(
            domain.to_string(),
            vec!["v=spf1 mx -all".to_string()],
        );
        self.txt.insert(
            format!("default._domainkey.{domain}"),
            vec!["v=DKIM1; k=rsa; p=MIGf".to_string()],
        );
        self
    }

    pub fn with_host(mut self, name: &str) -> Self {
        self.hosts.insert(
            name.to_string(),
            vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 20))],
        );
        self
    }

    pub fn with_mx(mut self, domain: &str, exchanges: &[(u16, &str)]) -> Self {
        self.mx.insert(
            domain.to_string(),
            exchanges
                .iter()
                .map(|(preference, exchange)| MxRecord {
                    preference: *preference,
                    exchange: exchange.to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn with_txt(mut self, name: &str, records: &[&str]) -> Self {
        self.txt.insert(
            name.to_string(),
            records.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn without_txt(mut self, name: &str) -> Self {
        self.txt.remove(name);
        self
    }

    /// Address lookups never answer.
    pub fn hanging_host(mut self) -> Self {
        self.host_fault = Some(DnsFault::Hang);
        self
    }

    /// MX lookups never answer.
    pub fn hanging_mx(mut self) -> Self {
        self.mx_fault = Some(DnsFault::Hang);
        self
    }

    /// Address lookups fail with a server error.
    pub fn failing_host(mut self) -> Self {
        self.host_fault = Some(DnsFault::Fail);
        self
    }

    /// MX lookups fail with a server error.
    pub fn failing_mx(mut self) -> Self {
        self.mx_fault = Some(DnsFault::Fail);
        self
    }

    /// TXT lookups never answer.
    pub fn hanging_txt(mut self) -> Self {
        self.hang_txt = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DnsResolver for StubDns {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.host_fault {
            return fault.apply(name).await;
        }
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(name.to_string()))
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.mx_fault {
            return fault.apply(domain).await;
        }
        self.mx
            .get(domain)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(domain.to_string()))
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_txt {
            std::future::pending::<()>().await;
        }
        self.txt
            .get(name)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(name.to_string()))
    }
}

pub enum ProbeBehaviour {
    /// Answer to `RCPT TO`.
    Reply(u16),
    /// Session refused before the mailbox was asked about.
    RefusedAt(SmtpStep, u16),
    Fail(SmtpError),
    Hang,
}

/// Prober with a fixed answer that counts and records its calls.
pub struct StubProber {
    behaviour: ProbeBehaviour,
    delay: Duration,
    calls: AtomicUsize,
    hosts: Mutex<Vec<String>>,
}

impl StubProber {
    pub fn new(behaviour: ProbeBehaviour) -> Self {
        Self {
            behaviour,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(ProbeBehaviour::Reply(250))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SmtpProber for StubProber {
    async fn probe(&self, host: &str, _email: &str) -> Result<SmtpReply, SmtpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hosts.lock().unwrap().push(host.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behaviour {
            ProbeBehaviour::Reply(code) => Ok(SmtpReply::new(SmtpStep::RcptTo, *code, "stub")),
            ProbeBehaviour::RefusedAt(step, code) => Ok(SmtpReply::new(*step, *code, "stub")),
            ProbeBehaviour::Fail(err) => Err(err.clone()),
            ProbeBehaviour::Hang => std::future::pending().await,
        }
    }
}

pub enum PageBehaviour {
    Html(String),
    Fail(FailureKind),
    Panic,
}

/// Renderer serving canned pages keyed by URL; unknown URLs fail with 404.
#[derive(Default)]
pub struct StubRenderer {
    pages: HashMap<String, PageBehaviour>,
    calls: AtomicUsize,
}

impl StubRenderer {
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages
            .insert(url.to_string(), PageBehaviour::Html(html.to_string()));
        self
    }

    pub fn with_failure(mut self, url: &str, kind: FailureKind) -> Self {
        self.pages.insert(url.to_string(), PageBehaviour::Fail(kind));
        self
    }

    pub fn with_panic(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), PageBehaviour::Panic);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PageRenderer for StubRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, PageFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some(PageBehaviour::Html(html)) => Ok(RenderedPage {
                original_url: url.to_string(),
                final_url: url.to_string(),
                html: html.clone(),
            }),
            Some(PageBehaviour::Fail(kind)) => {
                Err(PageFetchError::new(kind.clone(), "stubbed failure"))
            }
            Some(PageBehaviour::Panic) => panic!("renderer exploded on {url}"),
            None => Err(PageFetchError::new(FailureKind::HttpStatus(404), "not found")),
        }
    }
}

/// Records requested delays and returns at once.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
