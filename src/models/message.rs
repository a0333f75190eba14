use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::DecodeError, models::template::EmailTemplate};

/// One unit of delivery work. `message_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub message_id: String,
    pub template: EmailTemplate,
    pub recipient: String,
    pub subject: String,

    #[serde(default)]
    pub template_data: HashMap<String, String>,

    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl DeliveryRequest {
    pub fn new(template: EmailTemplate, recipient: String, subject: String) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            template,
            recipient,
            subject,
            template_data: HashMap::new(),
            correlation_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: String) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.template_data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.message_id.trim().is_empty() {
            return Err(DecodeError::Invalid("messageId cannot be blank".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryState {
    Success,
    Failure,
}

impl Display for DeliveryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DeliveryState::Success => write!(f, "SUCCESS"),
            DeliveryState::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Outcome of processing one `DeliveryRequest`, joined to it by `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub message_id: String,
    pub recipient: String,
    pub status: DeliveryState,

    #[serde(default)]
    pub error_detail: Option<String>,
}

impl DeliveryStatus {
    pub fn success(request: &DeliveryRequest) -> Self {
        Self {
            message_id: request.message_id.clone(),
            recipient: request.recipient.clone(),
            status: DeliveryState::Success,
            error_detail: None,
        }
    }

    pub fn failure(request: &DeliveryRequest, error_detail: String) -> Self {
        Self {
            message_id: request.message_id.clone(),
            recipient: request.recipient.clone(),
            status: DeliveryState::Failure,
            error_detail: Some(error_detail),
        }
    }

    /// `error_detail` is present exactly when the status is a failure.
    pub fn validate(&self) -> Result<(), DecodeError> {
        match (self.status, &self.error_detail) {
            (DeliveryState::Success, None) | (DeliveryState::Failure, Some(_)) => Ok(()),
            (DeliveryState::Success, Some(_)) => Err(DecodeError::Invalid(
                "errorDetail must be null for SUCCESS".to_string(),
            )),
            (DeliveryState::Failure, None) => Err(DecodeError::Invalid(
                "errorDetail is required for FAILURE".to_string(),
            )),
        }
    }
}

/// Broker-supplied death metadata, read from `x-death` or `x-first-death-*` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathInfo {
    pub queue: Option<String>,
    pub reason: Option<String>,
    pub exchange: Option<String>,
    pub routing_keys: Vec<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub request: Option<DeliveryRequest>,
    pub raw_payload: String,
    pub decode_error: Option<String>,
    pub correlation_id: Option<String>,
    pub original_queue: Option<String>,
    pub original_exchange: Option<String>,
    pub original_routing_keys: Vec<String>,
    pub reason: Option<String>,
    pub retry_count: u64,
    pub received_at: DateTime<Utc>,
}

/// A message as handed to a subscription handler, stripped of broker types.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
    pub retry_count: u32,
    pub death: Option<DeathInfo>,
}

impl InboundMessage {
    pub fn from_payload(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }
}

/// What the subscription loop must do with a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Re-publish to the original route with the retry counter set, then ack.
    Retry { retry_count: u32 },
    /// Reject without requeue; the queue's dead-letter arguments route it on.
    DeadLetter,
    /// Nack with requeue so the broker redelivers it unchanged. Returned while
    /// another worker holds the request's idempotency claim; also the fallback
    /// when a retry copy cannot be re-published.
    Requeue,
}
