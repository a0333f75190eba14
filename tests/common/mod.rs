#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use delivery_service::{
    clients::{
        mailer::MailTransport,
        producer::{MessageProducer, OutboundMessage, Publisher},
        rbmq::BrokerAdmin,
        renderer::TemplateRegistry,
    },
    codec::{self, Envelope},
    dispatcher::Dispatcher,
    error::{BrokerError, IdempotencyError, PublishError, TransportError},
    idempotency::{IdempotencyStatus, IdempotencyStore},
    models::{
        message::{DeliveryRequest, DeliveryStatus, InboundMessage},
        retry::RetryPolicy,
        template::EmailTemplate,
        topology::QueueTopology,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Mail transport that records every send, optionally failing with a fixed message.
#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub failure: Option<String>,
}

impl FakeMailer {
    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeMailer {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });

        match &self.failure {
            Some(message) => Err(TransportError::Smtp(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub message: OutboundMessage,
}

/// Publisher that records messages. The first `failures` publishes fail.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Published>>,
    pub failures: AtomicU32,
}

impl RecordingPublisher {
    pub fn failing(times: u32) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failures: AtomicU32::new(times),
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<DeliveryStatus> {
        self.published()
            .iter()
            .map(|p| codec::decode_status(&p.message.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), PublishError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Broker("channel closed".to_string()));
        }

        self.published.lock().unwrap().push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        });

        Ok(())
    }
}

/// In-memory queue depths keyed by physical queue name.
#[derive(Default)]
pub struct FakeBroker {
    pub depths: Mutex<HashMap<String, u32>>,
    pub unavailable: bool,
}

impl FakeBroker {
    pub fn with_depths(depths: &[(&str, u32)]) -> Self {
        Self {
            depths: Mutex::new(
                depths
                    .iter()
                    .map(|(queue, depth)| (queue.to_string(), *depth))
                    .collect(),
            ),
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            depths: Mutex::new(HashMap::new()),
            unavailable: true,
        }
    }

    pub fn depth(&self, queue: &str) -> u32 {
        self.depths.lock().unwrap().get(queue).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BrokerAdmin for FakeBroker {
    async fn queue_depth(&self, queue: &str) -> Result<u32, BrokerError> {
        if self.unavailable {
            return Err(BrokerError::Unavailable("broker down".to_string()));
        }

        Ok(self.depth(queue))
    }

    async fn purge_queue(&self, queue: &str) -> Result<u32, BrokerError> {
        if self.unavailable {
            return Err(BrokerError::Unavailable("broker down".to_string()));
        }

        let mut depths = self.depths.lock().unwrap();
        Ok(depths.insert(queue.to_string(), 0).unwrap_or(0))
    }
}

pub fn registry() -> TemplateRegistry {
    TemplateRegistry::new()
        .with_template(EmailTemplate::CustomerWelcome, "<p>Welcome, {{name}}!</p>")
        .with_template(EmailTemplate::OrderShipment, "<p>Order {{orderNumber}} shipped</p>")
}

pub fn welcome_request() -> DeliveryRequest {
    DeliveryRequest::new(
        EmailTemplate::CustomerWelcome,
        "a@example.com".to_string(),
        "Welcome".to_string(),
    )
    .with_message_id("m1".to_string())
    .with_data("name", "Ann")
    .with_correlation_id("c1".to_string())
}

pub fn inbound(request: &DeliveryRequest) -> InboundMessage {
    InboundMessage::from_payload(codec::encode(&Envelope::Request(request.clone())).unwrap())
}

/// Shared idempotency store standing in for Redis. Clone the `Arc` to give
/// several dispatchers the same view, as competing workers have.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    pub entries: Mutex<HashMap<String, IdempotencyStatus>>,
    pub unavailable: bool,
}

impl InMemoryIdempotencyStore {
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unavailable: true,
        }
    }

    pub fn entry(&self, message_id: &str) -> Option<IdempotencyStatus> {
        self.entries.lock().unwrap().get(message_id).cloned()
    }

    /// Marks a request as claimed by some other worker.
    pub fn hold(&self, message_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(message_id.to_string(), IdempotencyStatus::Processing);
    }

    fn ensure_available(&self) -> Result<(), IdempotencyError> {
        if self.unavailable {
            return Err(IdempotencyError::Unavailable("redis down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn check(&self, message_id: &str) -> Result<IdempotencyStatus, IdempotencyError> {
        self.ensure_available()?;
        Ok(self.entry(message_id).unwrap_or(IdempotencyStatus::NotFound))
    }

    async fn claim(&self, message_id: &str) -> Result<bool, IdempotencyError> {
        self.ensure_available()?;

        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(message_id) {
            return Ok(false);
        }

        entries.insert(message_id.to_string(), IdempotencyStatus::Processing);
        Ok(true)
    }

    async fn complete(&self, status: &DeliveryStatus) -> Result<(), IdempotencyError> {
        self.ensure_available()?;

        self.entries.lock().unwrap().insert(
            status.message_id.clone(),
            IdempotencyStatus::Completed(status.clone()),
        );
        Ok(())
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub mailer: Arc<FakeMailer>,
    pub publisher: Arc<RecordingPublisher>,
    pub store: Arc<InMemoryIdempotencyStore>,
    pub topology: QueueTopology,
}

pub fn harness(mailer: FakeMailer, publisher: RecordingPublisher, max_retries: u32) -> Harness {
    harness_with_store(
        Arc::new(mailer),
        publisher,
        max_retries,
        Arc::new(InMemoryIdempotencyStore::default()),
    )
}

/// A dispatcher wired to an existing mailer and store, so several workers can share them.
pub fn harness_with_store(
    mailer: Arc<FakeMailer>,
    publisher: RecordingPublisher,
    max_retries: u32,
    store: Arc<InMemoryIdempotencyStore>,
) -> Harness {
    let publisher = Arc::new(publisher);
    let topology = QueueTopology::default();

    let dispatcher = Dispatcher::new(
        Arc::new(registry()),
        mailer.clone(),
        MessageProducer::new(publisher.clone()),
        topology.clone(),
        RetryPolicy::new(max_retries),
        store.clone(),
    );

    Harness {
        dispatcher,
        mailer,
        publisher,
        store,
        topology,
    }
}
