use crate::domain::payment::PaymentStatus;
use thiserror::Error;

/// Reasons a bearer token is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization token is missing")]
    Missing,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Token has expired")]
    Expired,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Invalid {field}: {reason}")]
    ValidationError { field: &'static str, reason: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },
    #[error("{reason}")]
    StateTransition {
        from: PaymentStatus,
        attempted: PaymentStatus,
        reason: String,
    },
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn serialization(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
