use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Represents a strictly positive monetary amount.
///
/// Wraps `rust_decimal::Decimal` so a non-positive value can never reach the ledger.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::validation("amount", "Amount must be positive"))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| PaymentError::validation("amount", "Invalid amount"))?;
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// ISO-4217 style three letter currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub const DEFAULT: &'static str = "USD";

    pub fn new(code: &str) -> Result<Self, PaymentError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(PaymentError::validation(
                "currency",
                format!("'{code}' is not a three letter currency code"),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

/// Guarded moves along the payment lifecycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PaymentAction {
    Begin,
    Complete,
    Fail,
    Refund,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// The transition table. `None` means the action is rejected from this state.
    pub fn apply(self, action: PaymentAction) -> Option<PaymentStatus> {
        use PaymentAction::*;
        use PaymentStatus::*;
        match (self, action) {
            (Pending, Begin) => Some(Processing),
            (Processing, Complete) => Some(Completed),
            (Processing, Fail) => Some(Failed),
            (Completed, Refund) => Some(Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                PaymentError::validation(
                    "status",
                    format!(
                        "Invalid status '{s}'. Must be one of: pending, processing, completed, failed, refunded"
                    ),
                )
            })
    }
}

/// A payment request before it is assigned an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub booking_ref: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub payment_id: Uuid,
    /// Surrogate id of the owning `LocalIdentity`.
    pub owner: u64,
    pub booking_ref: String,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Validates the request and builds a `pending` payment.
    pub fn open(owner: u64, request: NewPayment, now: DateTime<Utc>) -> Result<Self, PaymentError> {
        let booking_ref = request.booking_ref.trim();
        if booking_ref.is_empty() {
            return Err(PaymentError::validation("booking_ref", "booking_ref is required"));
        }
        let amount = Amount::new(request.amount)?;
        let currency = match request.currency.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Currency::new(code)?,
            _ => Currency::default(),
        };

        Ok(Self {
            payment_id: Uuid::new_v4(),
            owner,
            booking_ref: booking_ref.to_string(),
            amount,
            currency,
            status: PaymentStatus::Pending,
            payment_method: request.payment_method.filter(|m| !m.trim().is_empty()),
            transaction_ref: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Generates a gateway-style reference: `TXN-` followed by 12 upper-case hex digits.
pub fn new_transaction_ref() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("TXN-{}", hex[..12].to_ascii_uppercase())
}
