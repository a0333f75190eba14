use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions, QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    clients::producer::{OutboundMessage, Publisher},
    config::Config,
    error::{BrokerError, PublishError},
    models::{
        message::{DeathInfo, Disposition, InboundMessage},
        retry::RETRY_COUNT_HEADER,
        topology::{DeadLetterArgs, ExchangeType, QueueTopology},
    },
    utils::retry_with_backoff,
};

/// Business logic run for every delivery of a subscribed queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Disposition;
}

/// Read-only queue metadata plus the one destructive operation operators need.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn queue_depth(&self, queue: &str) -> Result<u32, BrokerError>;

    async fn purge_queue(&self, queue: &str) -> Result<u32, BrokerError>;
}

/// Channel operations used to settle a delivery once its handler returns.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn republish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError>;
}

/// The parts of a broker delivery needed to settle or re-publish it.
#[derive(Debug, Clone, Default)]
pub struct ReceivedDelivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
}

impl From<&Delivery> for ReceivedDelivery {
    fn from(delivery: &Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            data: delivery.data.clone(),
            properties: delivery.properties.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RabbitMqClient {
    connection: Arc<Connection>,
    channel: Channel,
    topology: QueueTopology,
    concurrency: usize,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, BrokerError> {
        info!("Connecting to RabbitMQ");

        let connection =
            Connection::connect(&config.rabbitmq_url, ConnectionProperties::default()).await?;

        info!("RabbitMQ connection established");

        let channel = connection.create_channel().await?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        debug!(
            prefetch_count = config.prefetch_count,
            "RabbitMQ channel created with publisher confirms"
        );

        Ok(Self {
            connection: Arc::new(connection),
            channel,
            topology: config.topology(),
            concurrency: config.worker_concurrency.max(1),
        })
    }

    /// Connects at startup, backing off between attempts as configured.
    pub async fn connect_with_backoff(config: &Config) -> Result<Self, BrokerError> {
        retry_with_backoff(&config.retry_config(), || Self::connect(config)).await
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Declares every exchange, queue and binding in the topology. The
    /// request queue carries the dead-letter arguments.
    pub async fn declare_topology(&self) -> Result<(), BrokerError> {
        let dead_letter_args = self.topology.request_dead_letter_args();

        for route in self.topology.routes() {
            let kind = match route.exchange_type {
                ExchangeType::Topic => ExchangeKind::Topic,
                ExchangeType::Direct => ExchangeKind::Direct,
            };

            self.channel
                .exchange_declare(
                    &route.exchange,
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;

            let arguments = if route.queue == self.topology.request.queue {
                dead_letter_arguments(&dead_letter_args)
            } else {
                FieldTable::default()
            };

            self.channel
                .queue_declare(
                    &route.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    arguments,
                )
                .await?;

            self.channel
                .queue_bind(
                    &route.queue,
                    &route.exchange,
                    &route.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            info!(
                exchange = %route.exchange,
                queue = %route.queue,
                routing_key = %route.routing_key,
                "Route declared"
            );
        }

        Ok(())
    }

    /// Starts consuming `queue`, running `handler` for up to the configured
    /// number of deliveries at once. The task ends on shutdown or when the
    /// channel stops delivering.
    pub async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, BrokerError> {
        let consumer_tag = format!("{}-{}", queue, uuid::Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue, consumer_tag = %consumer_tag, concurrency = self.concurrency, "Consumer created for queue");

        let client = self.clone();
        let queue = queue.to_string();

        let handle = tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            };

            consumer
                .take_until(stop)
                .for_each_concurrent(client.concurrency, |delivery| {
                    let client = client.clone();
                    let handler = Arc::clone(&handler);
                    let queue = queue.clone();

                    async move {
                        match delivery {
                            Ok(delivery) => {
                                let message = inbound_message(&delivery);
                                let disposition = handler.handle(&message).await;

                                let received = ReceivedDelivery::from(&delivery);

                                if let Err(e) = settle(&client, &received, disposition).await {
                                    error!(
                                        queue = %queue,
                                        delivery_tag = delivery.delivery_tag,
                                        error = %e,
                                        "Failed to settle delivery"
                                    );
                                }
                            }
                            Err(e) => {
                                error!(queue = %queue, error = %e, "Consumer stream error");
                            }
                        }
                    }
                })
                .await;

            info!(consumer_tag = %consumer_tag, "Consumer stopped");
        });

        Ok(handle)
    }

    async fn publish_with_properties(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError> {
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::Broker(e.to_string()))?
            .await
            .map_err(|e| PublishError::Broker(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        Ok(())
    }

    async fn short_lived_channel(&self) -> Result<Channel, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Unavailable(
                "RabbitMQ connection is closed".to_string(),
            ));
        }

        Ok(self.connection.create_channel().await?)
    }
}

#[async_trait]
impl Publisher for RabbitMqClient {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), PublishError> {
        let properties = outbound_properties(&message);

        self.publish_with_properties(exchange, routing_key, &message.payload, properties)
            .await
    }
}

#[async_trait]
impl DeliveryChannel for RabbitMqClient {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;

        Ok(())
    }

    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await?;

        Ok(())
    }

    async fn republish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError> {
        self.publish_with_properties(exchange, routing_key, payload, properties)
            .await
    }
}

/// Applies a handler's disposition to the delivery.
///
/// A retry is re-published to the delivery's own exchange and routing key
/// with the counter header set, and only acknowledged once the broker
/// confirms the copy. If the copy cannot be published the original is nacked
/// with requeue so it is not lost.
pub async fn settle(
    channel: &dyn DeliveryChannel,
    delivery: &ReceivedDelivery,
    disposition: Disposition,
) -> Result<(), BrokerError> {
    let tag = delivery.delivery_tag;

    match disposition {
        Disposition::Ack => channel.ack(tag).await,
        Disposition::DeadLetter => channel.reject(tag, false).await,
        Disposition::Requeue => channel.nack_requeue(tag).await,
        Disposition::Retry { retry_count } => {
            let properties = retry_properties(&delivery.properties, retry_count);

            match channel
                .republish(&delivery.exchange, &delivery.routing_key, &delivery.data, properties)
                .await
            {
                Ok(()) => {
                    info!(
                        exchange = %delivery.exchange,
                        routing_key = %delivery.routing_key,
                        retry_count,
                        "Message re-published for retry"
                    );
                    channel.ack(tag).await
                }
                Err(e) => {
                    warn!(
                        delivery_tag = tag,
                        retry_count,
                        error = %e,
                        "Retry re-publication failed, leaving message to broker redelivery"
                    );
                    channel.nack_requeue(tag).await
                }
            }
        }
    }
}

/// The delivery's properties with the retry counter header replaced.
pub fn retry_properties(properties: &BasicProperties, retry_count: u32) -> BasicProperties {
    let mut headers = properties.headers().clone().unwrap_or_default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(retry_count));

    properties.clone().with_headers(headers)
}

#[async_trait]
impl BrokerAdmin for RabbitMqClient {
    async fn queue_depth(&self, queue: &str) -> Result<u32, BrokerError> {
        // Passive declares close the channel on a missing queue, so they get their own.
        let channel = self.short_lived_channel().await?;

        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        if channel.status().connected() {
            let _ = channel.close(200, "OK").await;
        }

        Ok(declared?.message_count())
    }

    async fn purge_queue(&self, queue: &str) -> Result<u32, BrokerError> {
        let channel = self.short_lived_channel().await?;

        let purged = channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await;

        if channel.status().connected() {
            let _ = channel.close(200, "OK").await;
        }

        Ok(purged?)
    }
}

pub fn dead_letter_arguments(args: &DeadLetterArgs) -> FieldTable {
    let mut table = FieldTable::default();

    table.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(LongString::from(args.exchange.as_str())),
    );
    table.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(LongString::from(args.routing_key.as_str())),
    );
    table.insert("x-message-ttl".into(), AMQPValue::LongUInt(args.message_ttl_ms));

    table
}

pub fn outbound_properties(message: &OutboundMessage) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type(ShortString::from("application/json"));

    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
    }

    if let Some(message_id) = &message.message_id {
        properties = properties.with_message_id(ShortString::from(message_id.as_str()));
    }

    if let Some(kind) = &message.kind {
        properties = properties.with_type(ShortString::from(kind.as_str()));
    }

    if let Some(retry_count) = message.retry_count {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(retry_count));
        properties = properties.with_headers(headers);
    }

    properties
}

fn inbound_message(delivery: &Delivery) -> InboundMessage {
    let headers = delivery.properties.headers().as_ref();

    InboundMessage {
        delivery_tag: delivery.delivery_tag,
        payload: delivery.data.clone(),
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        correlation_id: delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        redelivered: delivery.redelivered,
        retry_count: headers.map(retry_count).unwrap_or(0),
        death: headers.and_then(death_info),
    }
}

pub fn retry_count(headers: &FieldTable) -> u32 {
    header(headers, RETRY_COUNT_HEADER)
        .and_then(as_u64)
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}

/// Reads the most recent `x-death` entry, falling back to `x-first-death-*`.
pub fn death_info(headers: &FieldTable) -> Option<DeathInfo> {
    let latest = match header(headers, "x-death") {
        Some(AMQPValue::FieldArray(deaths)) => deaths.as_slice().iter().find_map(|entry| match entry {
            AMQPValue::FieldTable(table) => Some(table),
            _ => None,
        }),
        _ => None,
    };

    if let Some(entry) = latest {
        let routing_keys = match header(entry, "routing-keys") {
            Some(AMQPValue::FieldArray(keys)) => keys.as_slice().iter().filter_map(as_string).collect(),
            _ => Vec::new(),
        };

        return Some(DeathInfo {
            queue: header(entry, "queue").and_then(as_string),
            reason: header(entry, "reason").and_then(as_string),
            exchange: header(entry, "exchange").and_then(as_string),
            routing_keys,
            count: header(entry, "count").and_then(as_u64).unwrap_or(1),
        });
    }

    let queue = header(headers, "x-first-death-queue").and_then(as_string);
    let reason = header(headers, "x-first-death-reason").and_then(as_string);

    if queue.is_none() && reason.is_none() {
        return None;
    }

    Some(DeathInfo {
        queue,
        reason,
        exchange: header(headers, "x-first-death-exchange").and_then(as_string),
        routing_keys: Vec::new(),
        count: 1,
    })
}

fn header<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
    table
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value)
}

fn as_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn as_u64(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::ShortShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::LongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(u64::from(*v)),
        AMQPValue::LongLongInt(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}
