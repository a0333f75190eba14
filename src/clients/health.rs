use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{
        rbmq::{BrokerAdmin, RabbitMqClient},
        redis::RedisIdempotencyStore,
    },
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

/// Anything that can report whether it is reachable.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> ServiceHealth;
}

/// Reads the request queue's metadata through a short-lived channel.
pub struct BrokerHealthCheck {
    client: RabbitMqClient,
}

impl BrokerHealthCheck {
    pub fn new(client: RabbitMqClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthCheck for BrokerHealthCheck {
    async fn check(&self) -> ServiceHealth {
        let start = Instant::now();
        let queue = self.client.topology().request.queue.clone();

        match self.client.queue_depth(&queue).await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "RabbitMQ health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "RabbitMQ health check failed");
                ServiceHealth::unhealthy(format!("Broker check failed: {}", e))
            }
        }
    }
}

/// Checks the idempotency store with a `PING`.
pub struct RedisHealthCheck {
    store: RedisIdempotencyStore,
}

impl RedisHealthCheck {
    pub fn new(store: RedisIdempotencyStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for RedisHealthCheck {
    async fn check(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis health check failed");
                ServiceHealth::unhealthy(format!("Redis check failed: {}", e))
            }
        }
    }
}

pub struct HealthChecker {
    checks: Vec<(String, Arc<dyn HealthCheck>)>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn with_check(mut self, name: &str, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push((name.to_string(), check));
        self
    }

    pub fn for_services(client: RabbitMqClient, store: RedisIdempotencyStore) -> Self {
        Self::new()
            .with_check("message_broker", Arc::new(BrokerHealthCheck::new(client)))
            .with_check("idempotency_store", Arc::new(RedisHealthCheck::new(store)))
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        for (name, check) in &self.checks {
            checks.insert(name.clone(), check.check().await);
        }

        let status = if checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        HealthCheckResponse {
            status,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
