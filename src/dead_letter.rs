use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use tracing::error;

use crate::{
    clients::rbmq::MessageHandler,
    codec,
    models::message::{DeadLetterRecord, Disposition, InboundMessage},
};

/// Most recent dead-letter records, newest last. Bounded.
#[derive(Debug)]
pub struct DeadLetterInbox {
    capacity: usize,
    records: Mutex<VecDeque<DeadLetterRecord>>,
}

impl DeadLetterInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: DeadLetterRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        while records.len() >= self.capacity {
            records.pop_front();
        }

        records.push_back(record);
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains the dead-letter queue for inspection. Records are logged and kept
/// in the inbox; nothing is ever re-published to the work queue.
pub struct DeadLetterListener {
    inbox: Arc<DeadLetterInbox>,
}

impl DeadLetterListener {
    pub fn new(inbox: Arc<DeadLetterInbox>) -> Self {
        Self { inbox }
    }
}

pub fn dead_letter_record(message: &InboundMessage) -> DeadLetterRecord {
    let (request, decode_error) = match codec::decode_request(&message.payload) {
        Ok(request) => (Some(request), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let death = message.death.clone().unwrap_or_default();

    let correlation_id = request
        .as_ref()
        .and_then(|r| r.correlation_id.clone())
        .or_else(|| message.correlation_id.clone());

    DeadLetterRecord {
        request,
        raw_payload: String::from_utf8_lossy(&message.payload).into_owned(),
        decode_error,
        correlation_id,
        original_queue: death.queue,
        original_exchange: death.exchange,
        original_routing_keys: death.routing_keys,
        reason: death.reason,
        retry_count: u64::from(message.retry_count).max(death.count),
        received_at: Utc::now(),
    }
}

#[async_trait]
impl MessageHandler for DeadLetterListener {
    async fn handle(&self, message: &InboundMessage) -> Disposition {
        let record = dead_letter_record(message);

        error!(
            message_id = record.request.as_ref().map(|r| r.message_id.as_str()).unwrap_or(""),
            correlation_id = record.correlation_id.as_deref().unwrap_or(""),
            original_queue = record.original_queue.as_deref().unwrap_or("unknown"),
            original_exchange = record.original_exchange.as_deref().unwrap_or("unknown"),
            original_routing_keys = ?record.original_routing_keys,
            reason = record.reason.as_deref().unwrap_or("unknown"),
            retry_count = record.retry_count,
            decode_error = record.decode_error.as_deref().unwrap_or(""),
            "Message dead-lettered"
        );

        self.inbox.push(record);

        Disposition::Ack
    }
}
