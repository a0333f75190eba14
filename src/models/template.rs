use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Templates the renderer knows how to produce. The wire form is the
/// SCREAMING_SNAKE name; `template_id` is the file stem the renderer loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTemplate {
    OrderConfirmation,
    OrderShipment,
    OrderCancelled,
    OrderRefunded,
    CustomerWelcome,
    PaymentConfirmation,
    PaymentFailed,
    PaymentErrorAdmin,
    PaymentErrorCustomer,
    TestMessage,
}

impl EmailTemplate {
    pub const ALL: [EmailTemplate; 10] = [
        EmailTemplate::OrderConfirmation,
        EmailTemplate::OrderShipment,
        EmailTemplate::OrderCancelled,
        EmailTemplate::OrderRefunded,
        EmailTemplate::CustomerWelcome,
        EmailTemplate::PaymentConfirmation,
        EmailTemplate::PaymentFailed,
        EmailTemplate::PaymentErrorAdmin,
        EmailTemplate::PaymentErrorCustomer,
        EmailTemplate::TestMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplate::OrderConfirmation => "ORDER_CONFIRMATION",
            EmailTemplate::OrderShipment => "ORDER_SHIPMENT",
            EmailTemplate::OrderCancelled => "ORDER_CANCELLED",
            EmailTemplate::OrderRefunded => "ORDER_REFUNDED",
            EmailTemplate::CustomerWelcome => "CUSTOMER_WELCOME",
            EmailTemplate::PaymentConfirmation => "PAYMENT_CONFIRMATION",
            EmailTemplate::PaymentFailed => "PAYMENT_FAILED",
            EmailTemplate::PaymentErrorAdmin => "PAYMENT_ERROR_ADMIN",
            EmailTemplate::PaymentErrorCustomer => "PAYMENT_ERROR_CUSTOMER",
            EmailTemplate::TestMessage => "TEST_MESSAGE",
        }
    }

    pub fn template_id(&self) -> &'static str {
        match self {
            EmailTemplate::OrderConfirmation => "order-confirmation",
            EmailTemplate::OrderShipment => "order-shipment",
            EmailTemplate::OrderCancelled => "order-cancelled",
            EmailTemplate::OrderRefunded => "order-refunded",
            EmailTemplate::CustomerWelcome => "customer-welcome",
            EmailTemplate::PaymentConfirmation => "payment-confirmation",
            EmailTemplate::PaymentFailed => "payment-failed",
            EmailTemplate::PaymentErrorAdmin => "payment-error-admin",
            EmailTemplate::PaymentErrorCustomer => "payment-error-customer",
            EmailTemplate::TestMessage => "test-message-template",
        }
    }
}

impl Display for EmailTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EmailTemplate {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailTemplate::ALL
            .into_iter()
            .find(|template| template.as_str() == s)
            .ok_or_else(|| DecodeError::Invalid(format!("unknown template '{}'", s)))
    }
}
