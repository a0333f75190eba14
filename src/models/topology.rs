use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Topic,
    Direct,
}

/// An exchange bound to one durable queue through one routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub exchange: String,
    pub exchange_type: ExchangeType,
    pub queue: String,
    pub routing_key: String,
}

impl Route {
    pub fn new(exchange: &str, exchange_type: ExchangeType, queue: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            exchange_type,
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        }
    }
}

/// Arguments attached to the request queue so the broker dead-letters
/// rejected or expired messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterArgs {
    pub exchange: String,
    pub routing_key: String,
    pub message_ttl_ms: u32,
}

/// Logical queue names accepted by the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueAlias {
    #[serde(rename = "email")]
    Request,
    #[serde(rename = "dlq")]
    DeadLetter,
    #[serde(rename = "status")]
    Status,
}

impl QueueAlias {
    pub const ALL: [QueueAlias; 3] = [QueueAlias::Request, QueueAlias::DeadLetter, QueueAlias::Status];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "email" | "request" => Some(QueueAlias::Request),
            "dlq" | "dead-letter" => Some(QueueAlias::DeadLetter),
            "status" | "receipt" | "notification" => Some(QueueAlias::Status),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAlias::Request => "email",
            QueueAlias::DeadLetter => "dlq",
            QueueAlias::Status => "status",
        }
    }
}

/// Every exchange, queue and binding the service relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueTopology {
    pub request: Route,
    pub status: Route,
    pub dead_letter: Route,
    pub message_ttl_ms: u32,
}

impl QueueTopology {
    pub fn request_dead_letter_args(&self) -> DeadLetterArgs {
        DeadLetterArgs {
            exchange: self.dead_letter.exchange.clone(),
            routing_key: self.dead_letter.routing_key.clone(),
            message_ttl_ms: self.message_ttl_ms,
        }
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_millis(u64::from(self.message_ttl_ms))
    }

    pub fn queue_for(&self, alias: QueueAlias) -> &str {
        match alias {
            QueueAlias::Request => &self.request.queue,
            QueueAlias::DeadLetter => &self.dead_letter.queue,
            QueueAlias::Status => &self.status.queue,
        }
    }

    pub fn routes(&self) -> [&Route; 3] {
        [&self.request, &self.status, &self.dead_letter]
    }
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            request: Route::new("email.exchange", ExchangeType::Topic, "email.queue", "email.routing.key"),
            status: Route::new(
                "email.notification.exchange",
                ExchangeType::Topic,
                "email.notification.queue",
                "email.notification.routing.key",
            ),
            dead_letter: Route::new("email.dlx", ExchangeType::Direct, "email.dlq", "email.dead.letter.key"),
            message_ttl_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_physical_queues() {
        let topology = QueueTopology::default();

        assert_eq!(QueueAlias::parse("email"), Some(QueueAlias::Request));
        assert_eq!(QueueAlias::parse("DLQ"), Some(QueueAlias::DeadLetter));
        assert_eq!(QueueAlias::parse("receipt"), Some(QueueAlias::Status));
        assert_eq!(QueueAlias::parse("orders"), None);

        assert_eq!(topology.queue_for(QueueAlias::Request), "email.queue");
        assert_eq!(topology.queue_for(QueueAlias::DeadLetter), "email.dlq");
        assert_eq!(topology.queue_for(QueueAlias::Status), "email.notification.queue");
    }

    #[test]
    fn request_queue_dead_letters_into_dlx() {
        let topology = QueueTopology::default();
        let args = topology.request_dead_letter_args();

        assert_eq!(args.exchange, topology.dead_letter.exchange);
        assert_eq!(args.routing_key, topology.dead_letter.routing_key);
        assert_eq!(topology.message_ttl(), Duration::from_secs(10));
    }
}
