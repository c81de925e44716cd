use super::payment::{Payment, PaymentStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PaymentEventKind {
    #[serde(rename = "payment.created")]
    Created,
    #[serde(rename = "payment.processing")]
    Processing,
    #[serde(rename = "payment.completed")]
    Completed,
    #[serde(rename = "payment.failed")]
    Failed,
    #[serde(rename = "payment.refunded")]
    Refunded,
}

impl PaymentEventKind {
    pub fn routing_key(self) -> &'static str {
        match self {
            PaymentEventKind::Created => "payment.created",
            PaymentEventKind::Processing => "payment.processing",
            PaymentEventKind::Completed => "payment.completed",
            PaymentEventKind::Failed => "payment.failed",
            PaymentEventKind::Refunded => "payment.refunded",
        }
    }

    /// The event announcing that a payment entered `status`.
    ///
    /// Entering `pending` only happens at creation, which has its own event.
    pub fn for_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Pending => None,
            PaymentStatus::Processing => Some(PaymentEventKind::Processing),
            PaymentStatus::Completed => Some(PaymentEventKind::Completed),
            PaymentStatus::Failed => Some(PaymentEventKind::Failed),
            PaymentStatus::Refunded => Some(PaymentEventKind::Refunded),
        }
    }
}

impl fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// Message body placed on the channel.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OutboundEvent {
    #[serde(rename = "event_type")]
    pub kind: PaymentEventKind,
    #[serde(rename = "data")]
    pub payload: Payment,
}

impl OutboundEvent {
    pub fn new(kind: PaymentEventKind, payload: Payment) -> Self {
        Self { kind, payload }
    }

    pub fn routing_key(&self) -> &'static str {
        self.kind.routing_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::NewPayment;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_body_shape() {
        let payment = Payment::open(
            3,
            NewPayment {
                booking_ref: "BOOK-9".to_string(),
                amount: dec!(20),
                currency: None,
                payment_method: None,
            },
            Utc::now(),
        )
        .unwrap();

        let event = OutboundEvent::new(PaymentEventKind::Created, payment.clone());
        let body: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(body["event_type"], "payment.created");
        assert_eq!(body["data"]["booking_ref"], "BOOK-9");
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["payment_id"], payment.payment_id.to_string());
    }

    #[test]
    fn test_kind_for_status() {
        assert_eq!(PaymentEventKind::for_status(PaymentStatus::Pending), None);
        assert_eq!(
            PaymentEventKind::for_status(PaymentStatus::Refunded),
            Some(PaymentEventKind::Refunded)
        );
    }
}
