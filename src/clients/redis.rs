use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::{
    config::Config,
    error::IdempotencyError,
    idempotency::{
        IdempotencyStatus, IdempotencyStore, PROCESSING_MARKER, encode_entry, idempotency_key,
        parse_entry,
    },
    models::{message::DeliveryStatus, retry::RetryConfig},
    utils::retry_with_backoff,
};

/// Idempotency entries in Redis, shared by every worker instance.
///
/// A claim is a `SET NX` of the processing marker with a short TTL, so a
/// worker that dies mid-delivery releases the request once the TTL passes.
/// Completed statuses are kept for the longer idempotency TTL.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    processing_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisIdempotencyStore {
    pub async fn connect(config: &Config) -> Result<Self, IdempotencyError> {
        info!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
            processing_ttl_seconds: config.processing_ttl_seconds,
            retry_config: config.retry_config(),
        })
    }

    pub async fn connect_with_backoff(config: &Config) -> Result<Self, IdempotencyError> {
        retry_with_backoff(&config.retry_config(), || Self::connect(config)).await
    }

    pub async fn ping(&self) -> Result<(), IdempotencyError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;

        if reply != "PONG" {
            return Err(IdempotencyError::Unavailable(format!(
                "Unexpected PING reply '{}'",
                reply
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn check(&self, message_id: &str) -> Result<IdempotencyStatus, IdempotencyError> {
        let key = idempotency_key(message_id);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&key).await?;

        Ok(parse_entry(value.as_deref()))
    }

    async fn claim(&self, message_id: &str) -> Result<bool, IdempotencyError> {
        let key = idempotency_key(message_id);
        let mut conn = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(PROCESSING_MARKER)
            .arg("NX")
            .arg("EX")
            .arg(self.processing_ttl_seconds)
            .query_async(&mut conn)
            .await?;

        let claimed = reply.is_some();
        debug!(message_id, claimed, "Idempotency claim");

        Ok(claimed)
    }

    async fn complete(&self, status: &DeliveryStatus) -> Result<(), IdempotencyError> {
        let key = idempotency_key(&status.message_id);
        let value = encode_entry(status)?;

        retry_with_backoff(&self.retry_config, || {
            let key = key.clone();
            let value = value.clone();
            let mut conn = self.connection.clone();
            let ttl = self.idempotency_ttl_seconds;

            async move { conn.set_ex::<_, _, ()>(&key, &value, ttl).await }
        })
        .await?;

        Ok(())
    }
}
