use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contact_core::host_key;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::time::Sleeper;

/// Minimum spacing between requests to one host, shared by every worker.
///
/// Slots are booked under a lock: concurrent callers for a host receive
/// successive slots `interval` apart, and no booking is lost.
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
    sleeper: Arc<dyn Sleeper>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
            sleeper,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Hosts whose next slot still lies ahead.
    pub fn tracked_hosts(&self) -> usize {
        self.next_slot.lock().len()
    }

    /// Book the next slot for `host` and return how long to wait for it.
    pub fn reserve(&self, host: &str, now: Instant) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }
        let key = host_key(host);
        let mut slots = self.next_slot.lock();
        // A slot already in the past books the same as no slot at all.
        slots.retain(|_, next| *next > now);
        let slot = match slots.get(&key) {
            Some(next) if *next > now => *next,
            _ => now,
        };
        slots.insert(key, slot + self.interval);
        slot - now
    }

    /// Wait until a request to `host` is allowed.
    pub async fn acquire(&self, host: &str) {
        let wait = self.reserve(host, Instant::now());
        if !wait.is_zero() {
            self.sleeper.sleep(wait).await;
        }
    }
}
