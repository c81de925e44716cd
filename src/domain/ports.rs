use super::identity::{LocalIdentity, NewIdentity};
use super::page::{Page, PageRequest};
use super::payment::{Payment, PaymentStatus};
use crate::error::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Inserts a first sighting and assigns its surrogate id.
    ///
    /// Fails with `PaymentError::Duplicate` when the subject already exists.
    async fn insert(&self, identity: NewIdentity) -> Result<LocalIdentity>;
    async fn find_by_subject(&self, subject: &str) -> Result<Option<LocalIdentity>>;
    async fn get(&self, id: u64) -> Result<Option<LocalIdentity>>;
    async fn update(&self, identity: LocalIdentity) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `PaymentError::Duplicate` when the payment id is taken.
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>>;
    /// Writes `payment` only if the stored status still equals `expected`.
    ///
    /// Returns `false` (and writes nothing) when the status moved underneath the caller.
    async fn compare_and_swap(&self, expected: PaymentStatus, payment: Payment) -> Result<bool>;
    /// Unconditional overwrite of an existing payment.
    async fn put(&self, payment: Payment) -> Result<()>;
    /// Payments of one owner, newest first.
    async fn list_by_owner(&self, owner: u64, page: PageRequest) -> Result<Page<Payment>>;
    async fn list_by_booking(&self, booking_ref: &str) -> Result<Vec<Payment>>;
    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>>;
    async fn ping(&self) -> Result<()>;
}

pub type IdentityStoreBox = Box<dyn IdentityStore>;
pub type PaymentStoreBox = Box<dyn PaymentStore>;

/// Failure talking to the message broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("channel closed")]
    Closed,
    #[error("topology error: {0}")]
    Topology(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub persistent: bool,
    pub content_type: String,
}

impl MessageProperties {
    pub fn persistent_json() -> Self {
        Self {
            persistent: true,
            content_type: "application/json".to_string(),
        }
    }
}

/// An open channel on a broker connection.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn is_open(&self) -> bool;
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> std::result::Result<(), ChannelError>;
    async fn declare_queue(&self, name: &str, durable: bool) -> std::result::Result<(), ChannelError>;
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> std::result::Result<(), ChannelError>;
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> std::result::Result<(), ChannelError>;
    async fn close(&self);
}

/// Opens new broker connections.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> std::result::Result<Box<dyn MessageChannel>, ChannelError>;
}

pub type ChannelConnectorBox = Box<dyn ChannelConnector>;
