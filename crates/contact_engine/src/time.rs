use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall clock used for timestamps and cache expiry.
pub type UtcClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> UtcClock {
    Arc::new(Utc::now)
}

/// Waiting capability, so backoff and politeness delays can be observed in
/// tests without real sleeping.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
