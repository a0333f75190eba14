//! Wire envelopes shared with producer and consumer services.
//!
//! Every envelope carries a `discriminator` naming its contract, not a type
//! name from either side. Decoding checks it against `ALLOWED_DISCRIMINATORS`
//! before any typed deserialization happens, so a payload naming anything
//! else never reaches a constructor. Unknown fields are ignored; missing
//! required fields fail.

use serde::{Deserialize, Serialize};

use crate::{
    error::DecodeError,
    models::message::{DeliveryRequest, DeliveryStatus},
};

pub const REQUEST_DISCRIMINATOR: &str = "email.delivery.request.v1";
pub const STATUS_DISCRIMINATOR: &str = "email.delivery.status.v1";

pub const ALLOWED_DISCRIMINATORS: [&str; 2] = [REQUEST_DISCRIMINATOR, STATUS_DISCRIMINATOR];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discriminator")]
pub enum Envelope {
    #[serde(rename = "email.delivery.request.v1")]
    Request(DeliveryRequest),

    #[serde(rename = "email.delivery.status.v1")]
    Status(DeliveryStatus),
}

impl Envelope {
    pub fn discriminator(&self) -> &'static str {
        match self {
            Envelope::Request(_) => REQUEST_DISCRIMINATOR,
            Envelope::Status(_) => STATUS_DISCRIMINATOR,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Envelope::Request(request) => &request.message_id,
            Envelope::Status(status) => &status.message_id,
        }
    }
}

#[derive(Deserialize)]
struct Tag {
    discriminator: String,
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

pub fn decode(payload: &[u8]) -> Result<Envelope, DecodeError> {
    let tag: Tag =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if !ALLOWED_DISCRIMINATORS.contains(&tag.discriminator.as_str()) {
        return Err(DecodeError::UntrustedDiscriminator(tag.discriminator));
    }

    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match &envelope {
        Envelope::Request(request) => request.validate()?,
        Envelope::Status(status) => status.validate()?,
    }

    Ok(envelope)
}

pub fn decode_request(payload: &[u8]) -> Result<DeliveryRequest, DecodeError> {
    match decode(payload)? {
        Envelope::Request(request) => Ok(request),
        other => Err(DecodeError::UnexpectedSchema {
            expected: REQUEST_DISCRIMINATOR,
            found: other.discriminator().to_string(),
        }),
    }
}

pub fn decode_status(payload: &[u8]) -> Result<DeliveryStatus, DecodeError> {
    match decode(payload)? {
        Envelope::Status(status) => Ok(status),
        other => Err(DecodeError::UnexpectedSchema {
            expected: STATUS_DISCRIMINATOR,
            found: other.discriminator().to_string(),
        }),
    }
}
