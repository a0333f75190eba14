use std::fmt::Display;

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::models::retry::RetryConfig;

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    if result.is_err() {
        debug!("Tracing subscriber already installed");
    }
}

/// Runs `operation` until it succeeds or `max_attempts` is reached, sleeping
/// between attempts. The delay grows by `backoff_multiplier` up to
/// `max_delay_ms` and carries up to 10% jitter. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay_ms = config.initial_delay_ms.min(config.max_delay_ms);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %e, "Giving up after final attempt");
                return Err(e);
            }
            Err(e) => {
                warn!(attempt, max_attempts, delay_ms, error = %e, "Attempt failed, backing off");

                sleep(with_jitter(delay_ms)).await;
                delay_ms = next_delay(delay_ms, config);
                attempt += 1;
            }
        }
    }
}

/// The delay after `current_ms`, capped at `max_delay_ms`.
pub fn next_delay(current_ms: u64, config: &RetryConfig) -> u64 {
    current_ms
        .saturating_mul(config.backoff_multiplier.max(1))
        .min(config.max_delay_ms)
}

fn with_jitter(delay_ms: u64) -> Duration {
    let factor: f64 = rand::random_range(0.9..=1.1);
    Duration::from_millis((delay_ms as f64 * factor) as u64)
}
