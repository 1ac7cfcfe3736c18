use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use contact_core::{
    BackoffPolicy, CheckpointEntry, CheckpointStatus, ContactRecord, FailureReason, FailureRecord,
    PipelineConfig, RunSummary, StopPolicy, Target,
};
use contact_logging::{contact_debug, contact_error, contact_info, contact_warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{assemble_record, RunReport};
use crate::cache::CacheStore;
use crate::checkpoint::CheckpointStore;
use crate::error::PipelineError;
use crate::fetch::PageRenderer;
use crate::persist::StoreError;
use crate::rate_limit::HostRateLimiter;
use crate::scrape::PageScraper;
use crate::sink::EventSink;
use crate::time::Sleeper;
use crate::verify::{DnsResolver, EmailVerifier, SmtpProber};
use crate::PipelineEvent;

/// Shared handles the workers operate on.
#[derive(Clone)]
pub struct SchedulerParts {
    pub checkpoint: Arc<CheckpointStore>,
    pub verifier: Arc<EmailVerifier>,
    pub scraper: Arc<PageScraper>,
    pub limiter: Arc<HostRateLimiter>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl SchedulerParts {
    /// Wire the standard components around the given capabilities.
    pub fn new(
        config: &PipelineConfig,
        checkpoint: Arc<CheckpointStore>,
        cache: Arc<CacheStore>,
        renderer: Arc<dyn PageRenderer>,
        resolver: Arc<dyn DnsResolver>,
        prober: Arc<dyn SmtpProber>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let limiter = Arc::new(HostRateLimiter::new(
            config.per_host_min_interval(),
            sleeper.clone(),
        ));
        let verifier = EmailVerifier::new(resolver, prober, limiter.clone(), cache, config);
        let scraper = PageScraper::new(renderer, config.stage_timeouts.page_fetch());
        Self {
            checkpoint,
            verifier: Arc::new(verifier),
            scraper: Arc::new(scraper),
            limiter,
            sleeper,
        }
    }
}

/// Requests a running pipeline to stop.
///
/// `finish` lets in-flight targets complete; `immediate` aborts them and
/// leaves their checkpoints `in_progress` for the next load to recover.
#[derive(Debug, Clone)]
pub struct StopHandle {
    abort: CancellationToken,
    finish: CancellationToken,
}

impl StopHandle {
    fn new() -> Self {
        let abort = CancellationToken::new();
        let finish = abort.child_token();
        Self { abort, finish }
    }

    pub fn request(&self, policy: StopPolicy) {
        match policy {
            StopPolicy::Finish => self.finish(),
            StopPolicy::Immediate => self.immediate(),
        }
    }

    pub fn finish(&self) {
        self.finish.cancel();
    }

    pub fn immediate(&self) {
        self.abort.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.finish.is_cancelled()
    }
}

/// Bounded worker pool driving every target to `done` or `failed`.
pub struct Scheduler {
    config: PipelineConfig,
    parts: SchedulerParts,
    stop: StopHandle,
}

impl Scheduler {
    pub fn new(config: PipelineConfig, parts: SchedulerParts) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            parts,
            stop: StopHandle::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Process `targets`, replaying the ones a previous run already finished.
    ///
    /// Must run inside a tokio runtime; workers are spawned onto it.
    pub async fn run(
        &self,
        targets: Vec<Target>,
        sink: Arc<dyn EventSink>,
    ) -> Result<RunReport, PipelineError> {
        let loaded = self.parts.checkpoint.load()?;
        let state = Arc::new(RunState::default());

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        for target in targets {
            if !seen.insert(target.id.clone()) {
                contact_debug!("Skipping duplicate target {} ({})", target.id, target.url);
                continue;
            }
            match loaded.get(&target.id) {
                Some(CheckpointEntry {
                    status: CheckpointStatus::Done,
                    record: Some(record),
                    ..
                }) => {
                    state.summary.lock().record_done(record, true);
                    state.records.lock().push(record.clone());
                    sink.emit(PipelineEvent::TargetCompleted {
                        record: record.clone(),
                        resumed: true,
                    });
                }
                _ => queue.push_back(target),
            }
        }

        let resumed = state.summary.lock().resumed;
        contact_info!(
            "Starting run: {} targets queued, {} already done",
            queue.len(),
            resumed
        );

        let worker_count = self.config.max_concurrent_workers.min(queue.len());
        *state.queue.lock() = queue;
        let runner = Arc::new(TargetRunner {
            parts: self.parts.clone(),
            backoff: self.config.backoff_policy(),
            max_retries: self.config.max_retry_attempts,
            sink,
        });

        let workers: Vec<_> = (0..worker_count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    runner.clone(),
                    state.clone(),
                    self.stop.clone(),
                ))
            })
            .collect();
        for joined in futures_util::future::join_all(workers).await {
            if let Err(err) = joined {
                contact_error!("Worker task ended abnormally: {}", err);
            }
        }

        if let Some(err) = state.fatal.lock().take() {
            contact_error!("Run aborted by storage failure: {}", err);
            return Err(err.into());
        }

        let records = std::mem::take(&mut *state.records.lock());
        let summary = state.summary.lock().clone();
        let report = RunReport::new(records, summary);
        report.log_summary();
        Ok(report)
    }
}

#[derive(Default)]
struct RunState {
    queue: Mutex<VecDeque<Target>>,
    records: Mutex<Vec<ContactRecord>>,
    summary: Mutex<RunSummary>,
    fatal: Mutex<Option<StoreError>>,
}

impl RunState {
    fn next_target(&self) -> Option<Target> {
        self.queue.lock().pop_front()
    }

    /// Keep the first storage failure; later ones are consequences of it.
    fn record_fatal(&self, err: StoreError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        } else {
            contact_warn!("Further storage failure: {}", err);
        }
    }
}

enum TargetOutcome {
    Done(ContactRecord),
    Failed {
        reason: FailureReason,
        message: String,
    },
}

async fn run_worker(
    worker: usize,
    runner: Arc<TargetRunner>,
    state: Arc<RunState>,
    stop: StopHandle,
) {
    loop {
        if stop.is_stopping() {
            contact_debug!("Worker {} stopping", worker);
            break;
        }
        let Some(target) = state.next_target() else {
            break;
        };

        let mut task = tokio::spawn({
            let runner = runner.clone();
            let target = target.clone();
            async move { runner.process(&target).await }
        });
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = stop.abort.cancelled() => {
                task.abort();
                contact_warn!("Worker {} abandoned target {} on stop", worker, target.id);
                break;
            }
        };

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                state.record_fatal(err);
                stop.finish();
                break;
            }
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                contact_error!("Target {} panicked: {}", target.id, message);
                if let Err(err) = runner.fail_after_panic(&target, &message) {
                    state.record_fatal(err);
                    stop.finish();
                    break;
                }
                TargetOutcome::Failed {
                    reason: FailureReason::WorkerPanic,
                    message,
                }
            }
            Err(join_err) => {
                contact_warn!("Target {} was cancelled: {}", target.id, join_err);
                continue;
            }
        };

        match outcome {
            TargetOutcome::Done(record) => {
                state.summary.lock().record_done(&record, false);
                state.records.lock().push(record.clone());
                runner.sink.emit(PipelineEvent::TargetCompleted {
                    record,
                    resumed: false,
                });
            }
            TargetOutcome::Failed { reason, message } => {
                state.summary.lock().record_failed(reason);
                runner.sink.emit(PipelineEvent::TargetFailed {
                    target_id: target.id.clone(),
                    reason,
                    message,
                });
            }
        }
    }
}

struct TargetRunner {
    parts: SchedulerParts,
    backoff: BackoffPolicy,
    max_retries: u32,
    sink: Arc<dyn EventSink>,
}

impl TargetRunner {
    async fn process(&self, target: &Target) -> Result<TargetOutcome, StoreError> {
        let checkpoint = &self.parts.checkpoint;
        let mut retries = 0u32;

        let scraped = loop {
            let attempt = checkpoint.mark_in_progress(target)?;
            self.sink.emit(PipelineEvent::TargetStarted {
                target_id: target.id.clone(),
                attempt,
            });
            contact_debug!("Target {} attempt {} ({})", target.id, attempt, target.url);

            if let Some(host) = target.host() {
                self.parts.limiter.acquire(&host).await;
            }
            let scraped = self.parts.scraper.fetch(target).await;
            let Some(error) = scraped.page_fetch_error.clone() else {
                break scraped;
            };

            if error.is_transient() && retries < self.max_retries {
                let delay = self.backoff.delay(retries);
                contact_warn!(
                    "Target {} failed ({}); retry {} of {} in {:?}",
                    target.id,
                    error,
                    retries + 1,
                    self.max_retries,
                    delay
                );
                self.sink.emit(PipelineEvent::TargetRetrying {
                    target_id: target.id.clone(),
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error,
                });
                self.parts.sleeper.sleep(delay).await;
                retries += 1;
                continue;
            }

            let reason = error.kind.failure_reason(error.is_transient());
            let message = error.to_string();
            contact_warn!("Target {} failed: {} ({})", target.id, reason, message);
            checkpoint.mark_failed(&target.id, FailureRecord::new(reason, message.clone()))?;
            return Ok(TargetOutcome::Failed { reason, message });
        };

        let mut emails = Vec::new();
        for email in scraped.emails() {
            emails.push(self.parts.verifier.verify(email).await?);
        }
        let social_links = scraped.social_links().map(str::to_string).collect();
        let record = assemble_record(target, emails, social_links);

        checkpoint.mark_done(&target.id, record.clone())?;
        contact_info!(
            "Target {} done: {} emails, {} social links",
            target.id,
            record.emails.len(),
            record.social_links.len()
        );
        Ok(TargetOutcome::Done(record))
    }

    fn fail_after_panic(&self, target: &Target, message: &str) -> Result<(), StoreError> {
        let checkpoint = &self.parts.checkpoint;
        if checkpoint.status(&target.id) == Some(CheckpointStatus::InProgress) {
            checkpoint.mark_failed(
                &target.id,
                FailureRecord::new(FailureReason::WorkerPanic, message),
            )?;
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker panicked".to_string()
    }
}
