use serde::{Deserialize, Serialize};

/// Header holding how many times a request has been re-published after a
/// transient failure.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Backoff settings for startup connections and idempotency store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue { retry_count: u32 },
    DeadLetter,
}

/// Bounded retry for messages that hit a transient broker failure.
///
/// Queue-level TTL dead-letters a message on its first expiry, so the
/// retry bound is enforced here through `RETRY_COUNT_HEADER` instead of a
/// queue argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Requeue {
                retry_count: retry_count + 1,
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}
