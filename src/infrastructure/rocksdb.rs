use crate::domain::identity::{LocalIdentity, NewIdentity};
use crate::domain::page::{Page, PageRequest};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{IdentityStore, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for identity records, keyed by surrogate id.
pub const CF_IDENTITIES: &str = "identities";
/// Column Family mapping subject identifiers to surrogate ids.
pub const CF_IDENTITY_SUBJECTS: &str = "identity_subjects";
/// Column Family for payments, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family indexing payments by `owner | created_at | sequence`.
pub const CF_PAYMENTS_BY_OWNER: &str = "payments_by_owner";
/// Column Family indexing payments by `booking_ref | 0x00 | created_at | sequence`.
pub const CF_PAYMENTS_BY_BOOKING: &str = "payments_by_booking";
/// Column Family for sequence counters.
pub const CF_META: &str = "meta";

const IDENTITY_SEQ: &[u8] = b"identity_seq";
const PAYMENT_SEQ: &[u8] = b"payment_seq";

const ALL_CFS: [&str; 6] = [
    CF_IDENTITIES,
    CF_IDENTITY_SUBJECTS,
    CF_PAYMENTS,
    CF_PAYMENTS_BY_OWNER,
    CF_PAYMENTS_BY_BOOKING,
    CF_META,
];

/// A persistent store implementation using RocksDB.
///
/// Implements both `IdentityStore` and `PaymentStore` over separate Column Families.
/// Every write that touches more than one key goes through a single `WriteBatch`,
/// and read-check-write sequences (unique inserts, status compare-and-swap) are
/// serialized by `write_lock`, so each operation is all-or-nothing.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

fn internal(message: impl Into<String>) -> PaymentError {
    PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(PaymentError::serialization)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(PaymentError::serialization)
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| internal("corrupt 8-byte integer"))?;
    Ok(u64::from_be_bytes(raw))
}

/// Appends the ordering suffix shared by the payment indexes.
///
/// The creation instant is sign-flipped so that big-endian byte order matches
/// chronological order; the sequence breaks ties between equal timestamps.
fn index_key(mut prefix: Vec<u8>, payment: &Payment, seq: u64) -> Vec<u8> {
    let micros = payment.created_at.timestamp_micros() as u64 ^ (1 << 63);
    prefix.extend_from_slice(&micros.to_be_bytes());
    prefix.extend_from_slice(&seq.to_be_bytes());
    prefix
}

fn booking_prefix(booking_ref: &str) -> Vec<u8> {
    let mut key = booking_ref.as_bytes().to_vec();
    key.push(0);
    key
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every required column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("{name} column family not found")))
    }

    /// Reads the counter and returns the next value. Callers hold `write_lock`.
    fn next_seq(&self, key: &[u8]) -> Result<u64> {
        let meta = self.cf(CF_META)?;
        let current = match self.db.get_cf(meta, key)? {
            Some(bytes) => read_u64(&bytes)?,
            None => 0,
        };
        Ok(current + 1)
    }

    fn load_payment(&self, payment_id: &Uuid) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Walks an index CF backwards from the end of `prefix`, yielding payment ids.
    fn index_newest_first(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Uuid>> {
        let cf = self.cf(cf_name)?;
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&[0xFF; 16]);

        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let id = Uuid::from_slice(&value).map_err(|e| internal(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn payments_for(&self, ids: Vec<Uuid>) -> Result<Vec<Payment>> {
        let mut payments = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_payment(&id)? {
                Some(payment) => payments.push(payment),
                None => return Err(internal(format!("index points at missing payment {id}"))),
            }
        }
        Ok(payments)
    }
}

#[async_trait]
impl IdentityStore for RocksDBStore {
    async fn insert(&self, identity: NewIdentity) -> Result<LocalIdentity> {
        let _guard = self.write_lock.lock().await;

        let subjects = self.cf(CF_IDENTITY_SUBJECTS)?;
        if self
            .db
            .get_pinned_cf(subjects, identity.subject.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::Duplicate {
                entity: "identity",
                key: identity.subject,
            });
        }

        let id = self.next_seq(IDENTITY_SEQ)?;
        let identity = identity.into_identity(id);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_IDENTITIES)?, id.to_be_bytes(), encode(&identity)?);
        batch.put_cf(subjects, identity.subject.as_bytes(), id.to_be_bytes());
        batch.put_cf(self.cf(CF_META)?, IDENTITY_SEQ, id.to_be_bytes());
        self.db.write(batch)?;

        Ok(identity)
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<LocalIdentity>> {
        let id = {
            let subjects = self.cf(CF_IDENTITY_SUBJECTS)?;
            match self.db.get_cf(subjects, subject.as_bytes())? {
                Some(bytes) => read_u64(&bytes)?,
                None => return Ok(None),
            }
        };
        IdentityStore::get(self, id).await
    }

    async fn get(&self, id: u64) -> Result<Option<LocalIdentity>> {
        let cf = self.cf(CF_IDENTITIES)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, identity: LocalIdentity) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_IDENTITIES)?;
        let existing: LocalIdentity = match self.db.get_cf(cf, identity.id.to_be_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(PaymentError::not_found("identity", identity.id)),
        };
        if existing.subject != identity.subject {
            return Err(PaymentError::validation(
                "subject",
                "subject of an identity is immutable",
            ));
        }
        self.db.put_cf(cf, identity.id.to_be_bytes(), encode(&identity)?)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load_payment(&payment.payment_id)?.is_some() {
            return Err(PaymentError::Duplicate {
                entity: "payment",
                key: payment.payment_id.to_string(),
            });
        }

        let seq = self.next_seq(PAYMENT_SEQ)?;
        let id = payment.payment_id.as_bytes().to_vec();
        let owner_key = index_key(payment.owner.to_be_bytes().to_vec(), &payment, seq);
        let booking_key = index_key(booking_prefix(&payment.booking_ref), &payment, seq);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYMENTS)?, &id, encode(&payment)?);
        batch.put_cf(self.cf(CF_PAYMENTS_BY_OWNER)?, owner_key, &id);
        batch.put_cf(self.cf(CF_PAYMENTS_BY_BOOKING)?, booking_key, &id);
        batch.put_cf(self.cf(CF_META)?, PAYMENT_SEQ, seq.to_be_bytes());
        self.db.write(batch)?;

        Ok(())
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        self.load_payment(&payment_id)
    }

    async fn compare_and_swap(&self, expected: PaymentStatus, payment: Payment) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .load_payment(&payment.payment_id)?
            .ok_or_else(|| PaymentError::not_found("payment", payment.payment_id))?;
        if current.status != expected {
            return Ok(false);
        }
        self.db.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.payment_id.as_bytes(),
            encode(&payment)?,
        )?;
        Ok(true)
    }

    async fn put(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load_payment(&payment.payment_id)?.is_none() {
            return Err(PaymentError::not_found("payment", payment.payment_id));
        }
        self.db.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.payment_id.as_bytes(),
            encode(&payment)?,
        )?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: u64, page: PageRequest) -> Result<Page<Payment>> {
        let ids = self.index_newest_first(CF_PAYMENTS_BY_OWNER, &owner.to_be_bytes())?;
        let total = ids.len() as u64;
        let window = ids
            .into_iter()
            .skip(page.offset())
            .take(page.per_page() as usize)
            .collect();
        Ok(Page::new(self.payments_for(window)?, page, total))
    }

    async fn list_by_booking(&self, booking_ref: &str) -> Result<Vec<Payment>> {
        let ids = self.index_newest_first(CF_PAYMENTS_BY_BOOKING, &booking_prefix(booking_ref))?;
        self.payments_for(ids)
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let payment: Payment = decode(&value)?;
            if payment.status == status {
                payments.push(payment);
            }
        }
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn ping(&self) -> Result<()> {
        self.cf(CF_PAYMENTS).map(|_| ())
    }
}
