//! Bearer token verification.
//!
//! Tokens are HMAC-signed JWTs minted by the identity service. Only the claims this
//! service consumes are modelled; anything else in the payload is ignored.

use crate::clock::ClockRef;
use crate::config::AuthConfig;
use crate::domain::identity::Principal;
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const SCHEME: &str = "Bearer ";

/// Claims as issued by the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    pub exp: i64,
}

/// Lenient view of the payload used while verifying.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<Value>,
    user_id: Option<Value>,
    email: Option<String>,
    is_verified: Option<bool>,
    verified: Option<bool>,
    exp: Option<Value>,
}

impl RawClaims {
    fn subject(&self) -> Option<String> {
        [&self.sub, &self.user_id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = match self.exp.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))?,
            _ => return None,
        };
        DateTime::from_timestamp(seconds, 0)
    }
}

/// Signs `claims` with a shared secret, the way the identity service does.
pub fn issue_token(claims: &TokenClaims, secret: &str, algorithm: Algorithm) -> Result<String, AuthError> {
    encode(
        &Header::new(algorithm),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Invalid(e.to_string()))
}

/// Removes an optional `Bearer ` prefix. Returns `None` for blank input.
pub fn strip_scheme(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let token = match raw.get(..SCHEME.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => raw[SCHEME.len()..].trim(),
        _ => raw,
    };
    (!token.is_empty()).then_some(token)
}

fn lenient_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Verifies bearer tokens against the shared secret.
///
/// Holds no mutable state; one instance can serve any number of concurrent requests.
pub struct TokenVerifier {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
    clock: ClockRef,
}

impl TokenVerifier {
    pub fn new(secret: &str, algorithms: Vec<Algorithm>, clock: ClockRef) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            algorithms,
            clock,
        }
    }

    pub fn from_config(config: &AuthConfig, clock: ClockRef) -> Self {
        Self::new(&config.secret, config.algorithms.clone(), clock)
    }

    /// Verifies the raw `Authorization` value and returns the caller's claims.
    ///
    /// Expiry is judged before the signature, so an expired token is always reported
    /// as `Expired` whoever signed it.
    pub fn verify(&self, raw: Option<&str>) -> Result<Principal, AuthError> {
        let token = raw.and_then(strip_scheme).ok_or(AuthError::Missing)?;

        let header = decode_header(token).map_err(|e| reject(format!("malformed token: {e}")))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(reject(format!("algorithm {:?} is not allowed", header.alg)));
        }

        let mut unverified = lenient_validation(header.alg);
        unverified.insecure_disable_signature_validation();
        let claims = decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &unverified)
            .map_err(|e| reject(format!("malformed claims: {e}")))?
            .claims;

        let expires_at = claims
            .expires_at()
            .ok_or_else(|| reject("missing exp claim".to_string()))?;
        if expires_at < self.clock.now() {
            debug!(%expires_at, "Rejected expired token");
            return Err(AuthError::Expired);
        }

        let mut validation = lenient_validation(header.alg);
        validation.algorithms = self.algorithms.clone();
        decode::<RawClaims>(token, &self.key, &validation)
            .map_err(|e| reject(format!("signature check failed: {e}")))?;

        let subject = claims
            .subject()
            .ok_or_else(|| reject("missing subject claim".to_string()))?;

        Ok(Principal {
            subject,
            email: claims.email.filter(|e| !e.is_empty()),
            verified: claims.is_verified.or(claims.verified).unwrap_or(false),
            expires_at,
        })
    }
}

fn reject(reason: String) -> AuthError {
    debug!(%reason, "Rejected token");
    AuthError::Invalid(reason)
}
