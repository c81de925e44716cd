use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity claims taken from a verified token. Lives for one request only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub email: Option<String>,
    pub verified: bool,
    pub expires_at: DateTime<Utc>,
}

/// The local mirror of a remote identity.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct LocalIdentity {
    /// Surrogate id assigned by the identity store.
    pub id: u64,
    pub subject: String,
    pub email: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a first sighting; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl NewIdentity {
    pub fn from_principal(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            subject: principal.subject.clone(),
            email: principal.email.clone().filter(|e| !e.is_empty()),
            verified: principal.verified,
            created_at: now,
        }
    }

    pub fn into_identity(self, id: u64) -> LocalIdentity {
        LocalIdentity {
            id,
            subject: self.subject,
            email: self.email,
            verified: self.verified,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

impl LocalIdentity {
    /// Applies newer claims. Returns `true` when anything changed.
    ///
    /// An empty or missing email never clears a known one.
    pub fn refresh_from(&mut self, principal: &Principal, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if let Some(email) = principal.email.as_deref().filter(|e| !e.is_empty())
            && self.email.as_deref() != Some(email)
        {
            self.email = Some(email.to_string());
            changed = true;
        }
        if self.verified != principal.verified {
            self.verified = principal.verified;
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }
}
