//! Contact engine: page scraping, email verification and the worker pool,
//! over durable checkpoint and cache stores.
mod aggregate;
mod cache;
mod checkpoint;
mod decode;
mod error;
mod export;
mod extract;
mod fetch;
mod input;
mod persist;
mod rate_limit;
mod scheduler;
mod scrape;
mod sink;
mod time;
mod types;
pub mod verify;

pub use aggregate::{assemble_record, RunReport};
pub use cache::{CacheStats, CacheStore};
pub use checkpoint::{CheckpointProgress, CheckpointStore};
pub use error::PipelineError;
pub use export::{
    export_records, write_records_csv, ExportError, ExportOptions, ExportSummary, RECORD_COLUMNS,
};
pub use extract::{normalize_social_link, ContactExtractor, ExtractedContacts};
pub use fetch::{FetchSettings, HttpPageRenderer, PageRenderer};
pub use input::{load_targets, InputError};
pub use persist::{ensure_dir, AtomicFileWriter, StoreError};
pub use rate_limit::HostRateLimiter;
pub use scheduler::{Scheduler, SchedulerParts, StopHandle};
pub use scrape::{PageScraper, ScrapeOutcome};
pub use sink::{ChannelEventSink, EventSink, NullEventSink};
pub use time::{system_clock, Sleeper, TokioSleeper, UtcClock};
pub use types::{FailureKind, PageFetchError, PipelineEvent, RenderedPage};
pub use verify::EmailVerifier;
