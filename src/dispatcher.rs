use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
    clients::{
        mailer::MailTransport, producer::MessageProducer, rbmq::MessageHandler,
        renderer::Renderer,
    },
    codec,
    error::DeliveryError,
    idempotency::{IdempotencyStatus, IdempotencyStore},
    models::{
        message::{DeliveryRequest, DeliveryStatus, Disposition, InboundMessage},
        retry::{RetryDecision, RetryPolicy},
        topology::QueueTopology,
    },
};

/// Consumes delivery requests: render, send, then publish exactly one status.
///
/// Rendering and transport failures become a FAILURE status and the request
/// is still acknowledged. Only a failed status publish leaves the request
/// to be retried, bounded by the retry policy. The outcome is recorded in the
/// shared idempotency store before the status is published, so whichever
/// worker picks up a retried copy republishes it without sending again.
pub struct Dispatcher {
    renderer: Arc<dyn Renderer>,
    mailer: Arc<dyn MailTransport>,
    producer: MessageProducer,
    topology: QueueTopology,
    retry_policy: RetryPolicy,
    store: Arc<dyn IdempotencyStore>,
}

impl Dispatcher {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        mailer: Arc<dyn MailTransport>,
        producer: MessageProducer,
        topology: QueueTopology,
        retry_policy: RetryPolicy,
        store: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            renderer,
            mailer,
            producer,
            topology,
            retry_policy,
            store,
        }
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let body = self.renderer.render(request.template, &request.template_data)?;

        self.mailer
            .send(&request.recipient, &request.subject, &body)
            .await?;

        Ok(())
    }

    /// The status to publish for `request`, or `None` while another worker
    /// holds its claim.
    async fn outcome(&self, request: &DeliveryRequest) -> Option<DeliveryStatus> {
        match self.store.check(&request.message_id).await {
            Ok(IdempotencyStatus::Completed(status)) => {
                info!(
                    message_id = %request.message_id,
                    status = %status.status,
                    "Request already processed, re-publishing recorded status"
                );
                return Some(status);
            }
            Ok(IdempotencyStatus::Processing) => {
                info!(
                    message_id = %request.message_id,
                    "Request is being processed by another worker"
                );
                return None;
            }
            Ok(IdempotencyStatus::NotFound) => match self.store.claim(&request.message_id).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        message_id = %request.message_id,
                        "Request was claimed by another worker"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(
                        message_id = %request.message_id,
                        error = %e,
                        "Failed to claim request, delivering without a claim"
                    );
                }
            },
            Err(e) => {
                warn!(
                    message_id = %request.message_id,
                    error = %e,
                    "Idempotency check failed, delivering without a claim"
                );
            }
        }

        let status = match self.deliver(request).await {
            Ok(()) => {
                info!(
                    message_id = %request.message_id,
                    template = %request.template,
                    "Email delivered"
                );
                DeliveryStatus::success(request)
            }
            Err(e) => {
                warn!(
                    message_id = %request.message_id,
                    template = %request.template,
                    error = %e,
                    "Email delivery failed"
                );
                DeliveryStatus::failure(request, e.to_string())
            }
        };

        if let Err(e) = self.store.complete(&status).await {
            error!(
                message_id = %request.message_id,
                error = %e,
                "Failed to record delivery outcome"
            );
        }

        Some(status)
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, message: &InboundMessage) -> Disposition {
        let request = match codec::decode_request(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    delivery_tag = message.delivery_tag,
                    error = %e,
                    "Rejecting undecodable request to dead-letter queue"
                );
                return Disposition::DeadLetter;
            }
        };

        info!(
            message_id = %request.message_id,
            correlation_id = request.correlation_id.as_deref().unwrap_or(""),
            redelivered = message.redelivered,
            retry_count = message.retry_count,
            "Processing delivery request"
        );

        let Some(status) = self.outcome(&request).await else {
            return Disposition::Requeue;
        };

        let correlation_id = request
            .correlation_id
            .as_deref()
            .or(message.correlation_id.as_deref());

        match self
            .producer
            .publish_status(&self.topology, &status, correlation_id)
            .await
        {
            Ok(()) => Disposition::Ack,
            Err(e) => match self.retry_policy.decide(message.retry_count) {
                RetryDecision::Requeue { retry_count } => {
                    warn!(
                        message_id = %request.message_id,
                        retry_count,
                        max_retries = self.retry_policy.max_retries,
                        error = %e,
                        "Status publish failed, scheduling retry"
                    );
                    Disposition::Retry { retry_count }
                }
                RetryDecision::DeadLetter => {
                    error!(
                        message_id = %request.message_id,
                        retry_count = message.retry_count,
                        error = %e,
                        "Status publish failed after exhausting retries, dead-lettering request"
                    );
                    Disposition::DeadLetter
                }
            },
        }
    }
}
