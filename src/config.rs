//! Runtime settings for the verifier, publisher and ledger.
//!
//! Values are plain data; loading them from files or the environment is left to the
//! embedding process (the bundled binary maps its CLI flags onto these structs).

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret used by the identity issuer to sign tokens.
    pub secret: String,
    /// Algorithms a token header may name.
    pub algorithms: Vec<Algorithm>,
    /// Reject callers whose identity is not verified.
    pub require_verified: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "jwt-secret-key".to_string(),
            algorithms: vec![Algorithm::HS256],
            require_verified: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub exchange: String,
    pub queue: String,
    /// Pattern binding the queue to the exchange.
    pub binding_key: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exchange: "payments".to_string(),
            queue: "payment_events".to_string(),
            binding_key: "payment.*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// How long a payment may sit in `processing` before reconciliation fails it.
    #[serde(with = "duration_secs")]
    pub stale_processing_after: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            stale_processing_after: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub publisher: PublisherConfig,
    pub ledger: LedgerConfig,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
