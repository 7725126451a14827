use chrono::Duration;

/// Computes the wait before a failed job's next retry becomes eligible.
///
/// `delay(k) = base_delay_seconds × 2^k`, purely exponential and unjittered,
/// matching the manager's retry schedule. `base_delay_seconds` of `0` makes
/// every retry immediately eligible, which is intentional (§8 boundary
/// behavior: "With `base_delay_seconds = 0`, retries re-enter the queue
/// immediately").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_seconds: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_seconds: f64) -> Self {
        Self { base_delay_seconds }
    }

    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let seconds = self.base_delay_seconds * 2f64.powi(retry_count as i32);
        Duration::milliseconds((seconds * 1000.0).round() as i64)
    }
}
