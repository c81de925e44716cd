use crate::domain::identity::{LocalIdentity, NewIdentity};
use crate::domain::page::{Page, PageRequest};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{IdentityStore, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct IdentityTable {
    by_id: HashMap<u64, LocalIdentity>,
    by_subject: HashMap<String, u64>,
    last_id: u64,
}

/// A thread-safe in-memory identity store.
///
/// The subject index is checked and written under the same write lock, which gives
/// inserts the uniqueness guarantee a database constraint would.
#[derive(Default, Clone)]
pub struct InMemoryIdentityStore {
    table: Arc<RwLock<IdentityTable>>,
}

impl InMemoryIdentityStore {
    /// Creates a new, empty in-memory identity store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn insert(&self, identity: NewIdentity) -> Result<LocalIdentity> {
        let mut table = self.table.write().await;
        if table.by_subject.contains_key(&identity.subject) {
            return Err(PaymentError::Duplicate {
                entity: "identity",
                key: identity.subject,
            });
        }

        table.last_id += 1;
        let identity = identity.into_identity(table.last_id);
        table.by_subject.insert(identity.subject.clone(), identity.id);
        table.by_id.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<LocalIdentity>> {
        let table = self.table.read().await;
        Ok(table
            .by_subject
            .get(subject)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn get(&self, id: u64) -> Result<Option<LocalIdentity>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn update(&self, identity: LocalIdentity) -> Result<()> {
        let mut table = self.table.write().await;
        match table.by_id.get_mut(&identity.id) {
            Some(existing) if existing.subject == identity.subject => {
                *existing = identity;
                Ok(())
            }
            Some(_) => Err(PaymentError::validation(
                "subject",
                "subject of an identity is immutable",
            )),
            None => Err(PaymentError::not_found("identity", identity.id)),
        }
    }
}

#[derive(Default)]
struct PaymentTable {
    rows: HashMap<Uuid, Payment>,
    /// Insertion order, oldest first.
    order: Vec<Uuid>,
}

impl PaymentTable {
    fn newest_first(&self, filter: impl Fn(&Payment) -> bool) -> Vec<&Payment> {
        let mut matches: Vec<&Payment> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.rows.get(id))
            .filter(|p| filter(*p))
            .collect();
        // Stable: equal timestamps keep the newest insertion first
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches
    }
}

/// A thread-safe in-memory payment store.
///
/// Status compare-and-swap runs under the write lock, so two racing transitions on
/// the same payment cannot both succeed.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut table = self.table.write().await;
        if table.rows.contains_key(&payment.payment_id) {
            return Err(PaymentError::Duplicate {
                entity: "payment",
                key: payment.payment_id.to_string(),
            });
        }
        table.order.push(payment.payment_id);
        table.rows.insert(payment.payment_id, payment);
        Ok(())
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&payment_id).cloned())
    }

    async fn compare_and_swap(&self, expected: PaymentStatus, payment: Payment) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&payment.payment_id) {
            Some(current) if current.status == expected => {
                *current = payment;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::not_found("payment", payment.payment_id)),
        }
    }

    async fn put(&self, payment: Payment) -> Result<()> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&payment.payment_id) {
            Some(current) => {
                *current = payment;
                Ok(())
            }
            None => Err(PaymentError::not_found("payment", payment.payment_id)),
        }
    }

    async fn list_by_owner(&self, owner: u64, page: PageRequest) -> Result<Page<Payment>> {
        let table = self.table.read().await;
        let matches = table.newest_first(|p| p.owner == owner);
        let total = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(page.offset())
            .take(page.per_page() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn list_by_booking(&self, booking_ref: &str) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .newest_first(|p| p.booking_ref == booking_ref)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .newest_first(|p| p.status == status)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
