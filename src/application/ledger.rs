use crate::clock::ClockRef;
use crate::config::LedgerConfig;
use crate::domain::page::{Page, PageRequest};
use crate::domain::payment::{
    NewPayment, Payment, PaymentAction, PaymentStatus, new_transaction_ref,
};
use crate::domain::ports::PaymentStoreBox;
use crate::error::{PaymentError, Result};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Owns payments and enforces their lifecycle.
///
/// Every status change is a compare-and-swap against the status the change was
/// computed from, so concurrent callers can never both advance the same payment.
pub struct PaymentLedger {
    store: PaymentStoreBox,
    clock: ClockRef,
    config: LedgerConfig,
}

impl PaymentLedger {
    pub fn new(store: PaymentStoreBox, clock: ClockRef, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub async fn create(&self, owner: u64, request: NewPayment) -> Result<Payment> {
        let payment = Payment::open(owner, request, self.clock.now())?;
        self.store.insert(payment.clone()).await?;
        info!(
            payment_id = %payment.payment_id,
            owner,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment created"
        );
        Ok(payment)
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("payment", payment_id))
    }

    /// Runs a pending payment through `processing` to `completed`.
    ///
    /// Both steps are committed separately; a crash in between leaves the payment in
    /// `processing`, where `reconcile_stale` will eventually pick it up.
    pub async fn process(&self, payment_id: Uuid) -> Result<Payment> {
        let payment = self.get(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(already(payment.status, PaymentStatus::Processing));
        }

        let processing = self.advance(payment, PaymentAction::Begin, None).await?;
        let reference = new_transaction_ref();
        self.advance(processing, PaymentAction::Complete, Some(reference))
            .await
    }

    pub async fn refund(&self, payment_id: Uuid) -> Result<Payment> {
        let payment = self.get(payment_id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(PaymentError::StateTransition {
                from: payment.status,
                attempted: PaymentStatus::Refunded,
                reason: "Only completed payments can be refunded".to_string(),
            });
        }
        self.advance(payment, PaymentAction::Refund, None).await
    }

    /// Administrative override used by out-of-band confirmations.
    ///
    /// Sets any of the five statuses regardless of the transition table.
    pub async fn update_status(
        &self,
        payment_id: Uuid,
        status: &str,
        transaction_ref: Option<String>,
    ) -> Result<Payment> {
        let status: PaymentStatus = status.parse()?;
        let mut payment = self.get(payment_id).await?;
        let previous = payment.status;

        payment.status = status;
        if let Some(reference) = transaction_ref.filter(|r| !r.trim().is_empty()) {
            payment.transaction_ref = Some(reference);
        }
        payment.updated_at = self.clock.now();
        self.store.put(payment.clone()).await?;

        warn!(
            payment_id = %payment_id,
            from = %previous,
            to = %status,
            "Payment status overridden"
        );
        Ok(payment)
    }

    pub async fn list_by_owner(&self, owner: u64, page: u32, per_page: Option<u32>) -> Result<Page<Payment>> {
        let request = PageRequest::new(
            page,
            per_page.unwrap_or(self.config.default_page_size),
            self.config.max_page_size,
        );
        self.store.list_by_owner(owner, request).await
    }

    pub async fn list_by_booking(&self, booking_ref: &str) -> Result<Vec<Payment>> {
        self.store.list_by_booking(booking_ref).await
    }

    /// Fails every payment that has sat in `processing` for longer than `max_age`.
    ///
    /// Returns the payments this call moved; rows another worker settled first are
    /// skipped.
    pub async fn reconcile_stale(&self, max_age: Duration) -> Result<Vec<Payment>> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| PaymentError::validation("max_age", e.to_string()))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(max_age)
            .ok_or_else(|| PaymentError::validation("max_age", "max_age reaches before the earliest representable time"))?;

        let mut failed = Vec::new();
        for payment in self.store.list_by_status(PaymentStatus::Processing).await? {
            if payment.updated_at > cutoff {
                continue;
            }
            match self.advance(payment, PaymentAction::Fail, None).await {
                Ok(payment) => failed.push(payment),
                Err(PaymentError::StateTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    /// Reconciles with the configured staleness threshold.
    pub async fn reconcile(&self) -> Result<Vec<Payment>> {
        self.reconcile_stale(self.config.stale_processing_after).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    async fn advance(
        &self,
        mut payment: Payment,
        action: PaymentAction,
        transaction_ref: Option<String>,
    ) -> Result<Payment> {
        let from = payment.status;
        let to = from.apply(action).ok_or_else(|| already(from, from))?;

        payment.status = to;
        if transaction_ref.is_some() {
            payment.transaction_ref = transaction_ref;
        }
        payment.updated_at = self.clock.now();

        if !self.store.compare_and_swap(from, payment.clone()).await? {
            // Someone else moved it first; report what they moved it to
            let current = self.get(payment.payment_id).await?;
            return Err(already(current.status, to));
        }

        info!(payment_id = %payment.payment_id, %from, %to, "Payment transitioned");
        Ok(payment)
    }
}

fn already(current: PaymentStatus, attempted: PaymentStatus) -> PaymentError {
    PaymentError::StateTransition {
        from: current,
        attempted,
        reason: format!("Payment already {current}"),
    }
}
