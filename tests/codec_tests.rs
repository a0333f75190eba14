mod common;

use anyhow::Result;
use common::welcome_request;
use delivery_service::{
    codec::{self, Envelope, REQUEST_DISCRIMINATOR, STATUS_DISCRIMINATOR},
    error::DecodeError,
    models::message::{DeliveryRequest, DeliveryStatus},
};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};

/// Test: A request survives encode and decode unchanged
#[tokio::test]
async fn test_request_round_trip_preserves_every_field() -> Result<()> {
    let request = welcome_request().with_data("plan", "pro");

    let bytes = codec::encode(&Envelope::Request(request.clone()))?;
    let decoded = assert_ok!(codec::decode_request(&bytes));

    assert_eq!(decoded, request);

    Ok(())
}

/// Test: The wire form carries the discriminator and camelCase fields
#[tokio::test]
async fn test_wire_shape_uses_contract_discriminator() -> Result<()> {
    let bytes = codec::encode(&Envelope::Request(welcome_request()))?;
    let value: Value = serde_json::from_slice(&bytes)?;

    assert_eq!(value["discriminator"], REQUEST_DISCRIMINATOR);
    assert_eq!(value["messageId"], "m1");
    assert_eq!(value["template"], "CUSTOMER_WELCOME");
    assert_eq!(value["templateData"]["name"], "Ann");
    assert_eq!(value["correlationId"], "c1");

    let status = DeliveryStatus::success(&welcome_request());
    let bytes = codec::encode(&Envelope::Status(status))?;
    let value: Value = serde_json::from_slice(&bytes)?;

    assert_eq!(value["discriminator"], STATUS_DISCRIMINATOR);
    assert_eq!(value["status"], "SUCCESS");
    assert_eq!(value["errorDetail"], Value::Null);

    Ok(())
}

/// Test: Discriminators outside the allow-list are rejected before typed parsing
#[tokio::test]
async fn test_untrusted_discriminator_is_rejected() -> Result<()> {
    let payload = json!({
        "discriminator": "com.example.Exploit",
        "messageId": "m1",
    });

    let err = assert_err!(codec::decode(&serde_json::to_vec(&payload)?));

    assert_eq!(
        err,
        DecodeError::UntrustedDiscriminator("com.example.Exploit".to_string())
    );

    Ok(())
}

/// Test: A payload without a discriminator is malformed
#[tokio::test]
async fn test_missing_discriminator_is_malformed() -> Result<()> {
    let payload = json!({ "messageId": "m1" });

    let err = assert_err!(codec::decode(&serde_json::to_vec(&payload)?));
    assert!(matches!(err, DecodeError::Malformed(_)));

    Ok(())
}

/// Test: Unknown fields are ignored for forward compatibility
#[tokio::test]
async fn test_unknown_fields_are_ignored() -> Result<()> {
    let payload = json!({
        "discriminator": REQUEST_DISCRIMINATOR,
        "messageId": "m2",
        "template": "ORDER_SHIPMENT",
        "recipient": "b@example.com",
        "subject": "Shipped",
        "templateData": { "orderNumber": "42" },
        "priority": "high",
    });

    let request = assert_ok!(codec::decode_request(&serde_json::to_vec(&payload)?));

    assert_eq!(request.message_id, "m2");
    assert_eq!(request.correlation_id, None);

    Ok(())
}

/// Test: Missing required fields fail to decode
#[tokio::test]
async fn test_missing_required_field_fails() -> Result<()> {
    let payload = json!({
        "discriminator": REQUEST_DISCRIMINATOR,
        "messageId": "m3",
        "template": "ORDER_SHIPMENT",
        "subject": "Shipped",
    });

    let err = assert_err!(codec::decode(&serde_json::to_vec(&payload)?));
    assert!(matches!(err, DecodeError::Malformed(_)));

    Ok(())
}

/// Test: Template data defaults to empty when omitted
#[tokio::test]
async fn test_template_data_defaults_to_empty() -> Result<()> {
    let payload = json!({
        "discriminator": REQUEST_DISCRIMINATOR,
        "messageId": "m4",
        "template": "TEST_MESSAGE",
        "recipient": "c@example.com",
        "subject": "Hi",
    });

    let request: DeliveryRequest = assert_ok!(codec::decode_request(&serde_json::to_vec(&payload)?));
    assert!(request.template_data.is_empty());

    Ok(())
}

/// Test: Unknown template names are rejected
#[tokio::test]
async fn test_unknown_template_is_rejected() -> Result<()> {
    let payload = json!({
        "discriminator": REQUEST_DISCRIMINATOR,
        "messageId": "m5",
        "template": "NEWSLETTER",
        "recipient": "c@example.com",
        "subject": "Hi",
    });

    assert_err!(codec::decode(&serde_json::to_vec(&payload)?));

    Ok(())
}

/// Test: A blank message id is rejected
#[tokio::test]
async fn test_blank_message_id_is_rejected() -> Result<()> {
    let request = welcome_request().with_message_id("  ".to_string());
    let bytes = codec::encode(&Envelope::Request(request))?;

    let err = assert_err!(codec::decode(&bytes));
    assert!(matches!(err, DecodeError::Invalid(_)));

    Ok(())
}

/// Test: errorDetail must be present exactly for FAILURE statuses
#[tokio::test]
async fn test_status_error_detail_rule() -> Result<()> {
    let failure_without_detail = json!({
        "discriminator": STATUS_DISCRIMINATOR,
        "messageId": "m1",
        "recipient": "a@example.com",
        "status": "FAILURE",
    });
    assert_err!(codec::decode_status(&serde_json::to_vec(&failure_without_detail)?));

    let success_with_detail = json!({
        "discriminator": STATUS_DISCRIMINATOR,
        "messageId": "m1",
        "recipient": "a@example.com",
        "status": "SUCCESS",
        "errorDetail": "oops",
    });
    assert_err!(codec::decode_status(&serde_json::to_vec(&success_with_detail)?));

    let failure = DeliveryStatus::failure(&welcome_request(), "SMTP timeout".to_string());
    let decoded = assert_ok!(codec::decode_status(&codec::encode(&Envelope::Status(
        failure.clone()
    ))?));
    assert_eq!(decoded, failure);

    Ok(())
}

/// Test: Decoding a status where a request is expected reports the schema mismatch
#[tokio::test]
async fn test_schema_mismatch_is_reported() -> Result<()> {
    let status = DeliveryStatus::success(&welcome_request());
    let bytes = codec::encode(&Envelope::Status(status))?;

    let err = assert_err!(codec::decode_request(&bytes));

    assert_eq!(
        err,
        DecodeError::UnexpectedSchema {
            expected: REQUEST_DISCRIMINATOR,
            found: STATUS_DISCRIMINATOR.to_string(),
        }
    );

    Ok(())
}
