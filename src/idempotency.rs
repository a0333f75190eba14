use async_trait::async_trait;
use tracing::warn;

use crate::{error::IdempotencyError, models::message::DeliveryStatus};

/// Stored value marking a request some worker has claimed but not finished.
pub const PROCESSING_MARKER: &str = "processing";

/// What the shared store knows about a `message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyStatus {
    NotFound,
    Processing,
    Completed(DeliveryStatus),
}

/// Outcomes shared by every worker consuming the request queue, so a
/// redelivered or re-published request republishes its status instead of
/// sending the email again.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn check(&self, message_id: &str) -> Result<IdempotencyStatus, IdempotencyError>;

    /// Marks the request as in flight. Returns `false` if another worker
    /// already holds it or has completed it.
    async fn claim(&self, message_id: &str) -> Result<bool, IdempotencyError>;

    /// Records the final status, replacing the claim.
    async fn complete(&self, status: &DeliveryStatus) -> Result<(), IdempotencyError>;
}

pub fn idempotency_key(message_id: &str) -> String {
    format!("idempotency:{}", message_id)
}

/// Reads a stored value. Anything that is neither the processing marker
/// nor a recorded status is treated as absent.
pub fn parse_entry(value: Option<&str>) -> IdempotencyStatus {
    match value {
        None => IdempotencyStatus::NotFound,
        Some(PROCESSING_MARKER) => IdempotencyStatus::Processing,
        Some(raw) => match serde_json::from_str::<DeliveryStatus>(raw) {
            Ok(status) => IdempotencyStatus::Completed(status),
            Err(e) => {
                warn!(error = %e, "Unknown idempotency entry, treating as not found");
                IdempotencyStatus::NotFound
            }
        },
    }
}

pub fn encode_entry(status: &DeliveryStatus) -> Result<String, IdempotencyError> {
    Ok(serde_json::to_string(status)?)
}
