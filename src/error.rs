use thiserror::Error;

/// An envelope that cannot be turned into a trusted local type. Never retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Discriminator '{0}' is not in the allow-list")]
    UntrustedDiscriminator(String),

    #[error("Expected discriminator '{expected}', found '{found}'")]
    UnexpectedSchema {
        expected: &'static str,
        found: String,
    },

    #[error("Invalid envelope: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("No template registered for '{0}'")]
    NotRegistered(String),

    #[error("Missing variable in template: {0}")]
    MissingVariable(String),

    #[error("Failed to load template '{path}': {reason}")]
    Load { path: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("{0}")]
    Smtp(String),
}

/// Business-level delivery failure, reported through a FAILURE status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Refusing to publish invalid message: {0}")]
    Invalid(#[from] DecodeError),

    #[error("Broker rejected message for exchange '{exchange}' with routing key '{routing_key}'")]
    Nacked {
        exchange: String,
        routing_key: String,
    },

    #[error("Failed to publish message: {0}")]
    Broker(String),
}

/// Connection or channel level failure.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("RabbitMQ error: {0}")]
    Lapin(#[from] lapin::Error),

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Unknown queue alias '{0}'. Known aliases: email, dlq, status")]
    UnknownQueue(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failure talking to the shared idempotency store.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode recorded status: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}
