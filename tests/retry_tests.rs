use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use delivery_service::{
    clients::rbmq::RabbitMqClient,
    config::Config,
    models::retry::{RetryConfig, RetryDecision, RetryPolicy},
    utils::{next_delay, retry_with_backoff},
};
use tokio::time::{Instant, timeout};
use tokio_test::assert_err;

fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2,
    }
}

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn unreachable_broker_config() -> Result<Config> {
    Config::from_vars(vars(&[
        ("RABBITMQ_URL", "amqp://127.0.0.1:1/%2f"),
        ("REDIS_URL", "redis://127.0.0.1:1"),
        ("SMTP_HOST", "localhost"),
        ("SMTP_FROM_EMAIL", "noreply@example.com"),
        ("MAX_RETRY_ATTEMPTS", "3"),
        ("INITIAL_RETRY_DELAY_MS", "20"),
        ("MAX_RETRY_DELAY_MS", "40"),
    ]))
}

/// Test: An operation that keeps failing is attempted exactly max_attempts times
#[tokio::test]
async fn test_attempts_are_capped() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_config(4), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("connection refused"))
        }
    })
    .await;

    assert_err!(result);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    Ok(())
}

/// Test: The error from the final attempt is the one returned
#[tokio::test]
async fn test_last_error_is_returned() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_config(3), || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(anyhow!("attempt {} failed", attempt))
        }
    })
    .await;

    let error = result.err().ok_or_else(|| anyhow!("expected an error"))?;
    assert_eq!(error.to_string(), "attempt 3 failed");

    Ok(())
}

/// Test: A success after failures stops retrying and returns the value
#[tokio::test]
async fn test_success_after_failures_stops_retrying() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let value = retry_with_backoff(&fast_config(5), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("not yet"))
            } else {
                Ok("connected")
            }
        }
    })
    .await?;

    assert_eq!(value, "connected");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: A zero attempt limit still runs the operation once
#[tokio::test]
async fn test_zero_attempts_runs_once() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_config(0), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("down"))
        }
    })
    .await;

    assert_err!(result);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Delays grow by the multiplier and never exceed the cap
#[tokio::test]
async fn test_delay_growth_is_capped() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 10,
        initial_delay_ms: 100,
        max_delay_ms: 300,
        backoff_multiplier: 2,
    };

    let mut delay = config.initial_delay_ms;
    let mut delays = Vec::new();
    for _ in 0..4 {
        delay = next_delay(delay, &config);
        delays.push(delay);
    }

    assert_eq!(delays, vec![200, 300, 300, 300]);
    assert_eq!(next_delay(u64::MAX, &config), 300);

    Ok(())
}

/// Test: Startup against an unreachable broker gives up after the configured
/// attempts, backing off between them, instead of hanging
#[tokio::test]
async fn test_unreachable_broker_startup_gives_up() -> Result<()> {
    let config = unreachable_broker_config()?;
    assert_eq!(config.retry_config().max_attempts, 3);

    let start = Instant::now();
    let result = timeout(
        Duration::from_secs(10),
        RabbitMqClient::connect_with_backoff(&config),
    )
    .await?;

    assert!(result.is_err());
    // Two backoffs of 20ms then 40ms, less 10% jitter.
    assert!(start.elapsed() >= Duration::from_millis(54));

    Ok(())
}

/// Test: Configuration without a worker is rejected
#[tokio::test]
async fn test_zero_worker_concurrency_is_rejected() -> Result<()> {
    let mut pairs = vars(&[
        ("RABBITMQ_URL", "amqp://127.0.0.1:5672/%2f"),
        ("REDIS_URL", "redis://127.0.0.1:6379"),
        ("SMTP_HOST", "localhost"),
        ("SMTP_FROM_EMAIL", "noreply@example.com"),
    ]);
    pairs.push(("WORKER_CONCURRENCY".to_string(), "0".to_string()));

    assert_err!(Config::from_vars(pairs));

    Ok(())
}

/// Test: Requests below the limit are re-queued with the counter incremented
#[tokio::test]
async fn test_retry_policy_requeues_below_limit() -> Result<()> {
    let policy = RetryPolicy::new(3);

    assert_eq!(policy.decide(0), RetryDecision::Requeue { retry_count: 1 });
    assert_eq!(policy.decide(2), RetryDecision::Requeue { retry_count: 3 });

    Ok(())
}

/// Test: The (N+1)th failure dead-letters the request
#[tokio::test]
async fn test_retry_policy_dead_letters_at_limit() -> Result<()> {
    let policy = RetryPolicy::new(3);

    assert_eq!(policy.decide(3), RetryDecision::DeadLetter);
    assert_eq!(policy.decide(7), RetryDecision::DeadLetter);
    assert_eq!(RetryPolicy::new(0).decide(0), RetryDecision::DeadLetter);

    Ok(())
}

/// Test: The retry bound is enforced by the x-retry-count header counter, not
/// by queue TTL. TTL expiry dead-letters on first expiry, so walking the
/// counter from zero must take exactly max_retries re-publications before
/// the request is dead-lettered.
#[tokio::test]
async fn test_retry_bound_is_header_counter_not_ttl() -> Result<()> {
    let policy = RetryPolicy::new(3);

    let mut retry_count = 0;
    let mut republished = 0;

    while let RetryDecision::Requeue { retry_count: next } = policy.decide(retry_count) {
        retry_count = next;
        republished += 1;
    }

    assert_eq!(republished, 3);
    assert_eq!(retry_count, 3);

    Ok(())
}
