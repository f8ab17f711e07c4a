//! Coordinator configuration.
//!
//! Plain in-code settings with defaults. Loading them from files or the
//! environment is the embedding process's concern, not the library's.

use std::time::Duration;

/// What happens to a saga's log once an abort has finished.
///
/// A successful saga always clears its log in `end_saga`. After an abort
/// the history is more interesting, so retention is a policy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortLogPolicy {
    /// Keep the forward and compensation history for inspection. Callers
    /// must not assume an aborted saga's log is empty.
    #[default]
    Retain,
    /// Clear the stream once compensation has finished.
    Clear,
}

/// Settings shared by every saga started from one coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Post-abort log retention policy.
    pub abort_log: AbortLogPolicy,
    /// Retry bounds for compensations that report business failures.
    pub compensation_retry: RetryPolicy,
}

/// Bounded exponential backoff for compensation retries.
///
/// A compensation that keeps failing is retried up to `max_retries` times
/// and then escalated; it never re-enters the abort scan. Jitter is
/// applied with a simple hash-based approach to avoid thundering herd.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Cap applied to the exponential delay, before jitter.
    pub max_delay: Duration,
    /// Retry attempts after the initial call. Zero means one attempt only.
    pub max_retries: u32,
    /// Jitter factor: the delay is scaled by a value drawn from
    /// `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(2),
            max_retries: 3,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries: the first failure escalates.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay for a retry attempt (0-indexed), exponential with cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);

        let jittered_ms = if self.jitter > 0.0 {
            // Deterministic jitter from time and attempt number.
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0) as u64;
            let hash = now.wrapping_mul(31).wrapping_add(attempt as u64 * 17);
            let jitter_pct = ((hash % 1000) as f64 / 1000.0) * 2.0 - 1.0;
            let factor = 1.0 + (jitter_pct * self.jitter);
            (capped_ms as f64 * factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms)
    }

    /// Whether another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
