use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::{
    codec::{self, Envelope},
    error::PublishError,
    models::{
        message::{DeliveryRequest, DeliveryStatus},
        topology::QueueTopology,
    },
};

/// Bytes plus the broker metadata this service sets on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub kind: Option<String>,
    pub retry_count: Option<u32>,
}

/// Durable publish to an exchange. Returns only after the broker confirmed.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), PublishError>;
}

/// Encodes envelopes and hands them to a `Publisher`. Never retries.
#[derive(Clone)]
pub struct MessageProducer {
    publisher: Arc<dyn Publisher>,
}

impl MessageProducer {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        correlation_id: Option<&str>,
    ) -> Result<(), PublishError> {
        let payload = codec::encode(envelope)?;

        let message = OutboundMessage {
            payload,
            correlation_id: correlation_id
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            message_id: Some(envelope.message_id().to_string()),
            kind: Some(envelope.discriminator().to_string()),
            retry_count: None,
        };

        info!(
            exchange,
            routing_key,
            message_id = %envelope.message_id(),
            discriminator = envelope.discriminator(),
            "Publishing message"
        );

        self.publisher
            .publish(exchange, routing_key, message)
            .await
            .inspect_err(|e| {
                error!(
                    exchange,
                    routing_key,
                    message_id = %envelope.message_id(),
                    error = %e,
                    "Failed to publish message"
                );
            })
    }

    pub async fn publish_request(
        &self,
        topology: &QueueTopology,
        request: &DeliveryRequest,
    ) -> Result<(), PublishError> {
        request.validate()?;

        self.publish(
            &topology.request.exchange,
            &topology.request.routing_key,
            &Envelope::Request(request.clone()),
            request.correlation_id.as_deref(),
        )
        .await
    }

    pub async fn publish_status(
        &self,
        topology: &QueueTopology,
        status: &DeliveryStatus,
        correlation_id: Option<&str>,
    ) -> Result<(), PublishError> {
        self.publish(
            &topology.status.exchange,
            &topology.status.routing_key,
            &Envelope::Status(status.clone()),
            correlation_id,
        )
        .await
    }
}
