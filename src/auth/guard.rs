use crate::domain::identity::LocalIdentity;
use crate::domain::payment::Payment;
use crate::error::{PaymentError, Result};
use tracing::warn;

/// Only the owner may see or act on a payment.
pub fn authorize(identity: &LocalIdentity, payment: &Payment) -> Result<()> {
    if payment.owner == identity.id {
        return Ok(());
    }
    warn!(
        payment_id = %payment.payment_id,
        caller = identity.id,
        "Rejected access to a payment owned by another identity"
    );
    Err(PaymentError::Unauthorized {
        reason: "payment belongs to another user".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::NewPayment;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn identity(id: u64) -> LocalIdentity {
        LocalIdentity {
            id,
            subject: format!("user_{id}"),
            email: None,
            verified: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_owner_mismatch_is_rejected() {
        let payment = Payment::open(
            1,
            NewPayment {
                booking_ref: "BOOK-001".to_string(),
                amount: dec!(5),
                currency: None,
                payment_method: None,
            },
            Utc::now(),
        )
        .unwrap();

        assert!(authorize(&identity(1), &payment).is_ok());
        assert!(matches!(
            authorize(&identity(2), &payment),
            Err(PaymentError::Unauthorized { .. })
        ));
    }
}
