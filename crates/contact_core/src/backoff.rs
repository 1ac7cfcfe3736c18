use std::time::Duration;

/// Exponential retry delay: `min(base * factor^attempt, max)`.
///
/// `attempt` is zero-based: the delay before the first retry is `delay(0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1.0),
            max: max.max(base),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_ms = self.base.as_millis() as f64 * self.factor.powi(exponent);
        if !scaled_ms.is_finite() || scaled_ms >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(scaled_ms.round() as u64)
    }
}
