use super::ledger::PaymentLedger;
use super::publisher::EventPublisher;
use crate::auth::guard::authorize;
use crate::auth::pipeline::{
    Caller, RequestContext, RequestPipeline, RequireVerified, ResolveIdentity, VerifyToken,
};
use crate::auth::resolver::IdentityResolver;
use crate::auth::token::TokenVerifier;
use crate::clock::ClockRef;
use crate::config::AppConfig;
use crate::domain::events::PaymentEventKind;
use crate::domain::page::Page;
use crate::domain::payment::{NewPayment, Payment};
use crate::domain::ports::{ChannelConnectorBox, IdentityStoreBox, PaymentStoreBox};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Dependency status as reported by `readiness`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub database: bool,
    pub broker: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.database && self.broker
    }
}

/// The operations a routing layer calls.
///
/// Each request is admitted through the pipeline first (`authenticate`); the returned
/// `Caller` is then passed to the business operation. Owner-scoped operations check
/// ownership after fetching and before acting. Events go out after the change is
/// committed and their failure never fails the operation.
pub struct PaymentService {
    pipeline: RequestPipeline,
    ledger: PaymentLedger,
    publisher: EventPublisher,
}

impl PaymentService {
    pub fn new(pipeline: RequestPipeline, ledger: PaymentLedger, publisher: EventPublisher) -> Self {
        Self {
            pipeline,
            ledger,
            publisher,
        }
    }

    /// Wires the standard pipeline and components from configuration.
    pub fn from_config(
        config: &AppConfig,
        identities: IdentityStoreBox,
        payments: PaymentStoreBox,
        connector: ChannelConnectorBox,
        clock: ClockRef,
    ) -> Self {
        let verifier = Arc::new(TokenVerifier::from_config(&config.auth, clock.clone()));
        let resolver = Arc::new(IdentityResolver::new(identities, clock.clone()));

        let mut pipeline = RequestPipeline::new()
            .with_stage(VerifyToken::new(verifier))
            .with_stage(ResolveIdentity::new(resolver));
        if config.auth.require_verified {
            pipeline = pipeline.with_stage(RequireVerified);
        }

        Self::new(
            pipeline,
            PaymentLedger::new(payments, clock, config.ledger.clone()),
            EventPublisher::new(config.publisher.clone(), connector),
        )
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Caller> {
        self.pipeline
            .run(RequestContext::new(authorization))
            .await?
            .into_caller()
    }

    pub async fn create_payment(&self, caller: &Caller, request: NewPayment) -> Result<Payment> {
        let payment = self.ledger.create(caller.identity.id, request).await?;
        self.publisher
            .publish(PaymentEventKind::Created, &payment)
            .await;
        Ok(payment)
    }

    pub async fn get_payment(&self, caller: &Caller, payment_id: Uuid) -> Result<Payment> {
        let payment = self.ledger.get(payment_id).await?;
        authorize(&caller.identity, &payment)?;
        Ok(payment)
    }

    pub async fn list_payments(
        &self,
        caller: &Caller,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Page<Payment>> {
        self.ledger
            .list_by_owner(caller.identity.id, page, per_page)
            .await
    }

    /// Payments for a booking, restricted to the caller's own.
    pub async fn booking_payments(&self, caller: &Caller, booking_ref: &str) -> Result<Vec<Payment>> {
        Ok(self
            .ledger
            .list_by_booking(booking_ref)
            .await?
            .into_iter()
            .filter(|p| p.owner == caller.identity.id)
            .collect())
    }

    pub async fn process_payment(&self, caller: &Caller, payment_id: Uuid) -> Result<Payment> {
        let payment = self.ledger.get(payment_id).await?;
        authorize(&caller.identity, &payment)?;

        let payment = self.ledger.process(payment_id).await?;
        self.publisher
            .publish(PaymentEventKind::Completed, &payment)
            .await;
        Ok(payment)
    }

    pub async fn refund_payment(&self, caller: &Caller, payment_id: Uuid) -> Result<Payment> {
        let payment = self.ledger.get(payment_id).await?;
        authorize(&caller.identity, &payment)?;

        let payment = self.ledger.refund(payment_id).await?;
        self.publisher
            .publish(PaymentEventKind::Refunded, &payment)
            .await;
        Ok(payment)
    }

    /// Status override for gateway callbacks. Requires an authenticated caller but is
    /// not owner-scoped.
    pub async fn update_status(
        &self,
        _caller: &Caller,
        payment_id: Uuid,
        status: &str,
        transaction_ref: Option<String>,
    ) -> Result<Payment> {
        let payment = self
            .ledger
            .update_status(payment_id, status, transaction_ref)
            .await?;
        if let Some(kind) = PaymentEventKind::for_status(payment.status) {
            self.publisher.publish(kind, &payment).await;
        }
        Ok(payment)
    }

    /// Fails payments stuck in `processing` and announces each one.
    pub async fn reconcile_stale(&self) -> Result<Vec<Payment>> {
        let failed = self.ledger.reconcile().await?;
        for payment in &failed {
            self.publisher
                .publish(PaymentEventKind::Failed, payment)
                .await;
        }
        Ok(failed)
    }

    /// Liveness only; dependencies are reported by `readiness`.
    pub fn health(&self) -> &'static str {
        "healthy"
    }

    pub async fn readiness(&self) -> Readiness {
        Readiness {
            database: self.ledger.ping().await.is_ok(),
            broker: self.publisher.is_healthy().await,
        }
    }

    pub async fn shutdown(&self) {
        self.publisher.close().await;
    }
}
