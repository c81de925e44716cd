use crate::clock::ClockRef;
use crate::domain::identity::{LocalIdentity, NewIdentity, Principal};
use crate::domain::ports::IdentityStoreBox;
use crate::error::{PaymentError, Result};
use tracing::{debug, info};

/// Keeps the local identity mirror in step with verified principals.
pub struct IdentityResolver {
    store: IdentityStoreBox,
    clock: ClockRef,
}

impl IdentityResolver {
    pub fn new(store: IdentityStoreBox, clock: ClockRef) -> Self {
        Self { store, clock }
    }

    /// Get-or-create-or-update the identity for `principal`.
    ///
    /// A lost insert race (uniqueness conflict on the subject) is resolved by
    /// re-reading the winner's row and applying the refresh rules to it.
    pub async fn resolve(&self, principal: &Principal) -> Result<LocalIdentity> {
        let existing = match self.store.find_by_subject(&principal.subject).await? {
            Some(identity) => identity,
            None => {
                let new = NewIdentity::from_principal(principal, self.clock.now());
                match self.store.insert(new).await {
                    Ok(created) => {
                        info!(subject = %created.subject, id = created.id, "Created local identity");
                        return Ok(created);
                    }
                    Err(PaymentError::Duplicate { .. }) => {
                        debug!(subject = %principal.subject, "Concurrent first sighting, re-reading");
                        self.store
                            .find_by_subject(&principal.subject)
                            .await?
                            .ok_or_else(|| PaymentError::not_found("identity", &principal.subject))?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.refresh(existing, principal).await
    }

    pub async fn get(&self, id: u64) -> Result<LocalIdentity> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("identity", id))
    }

    async fn refresh(&self, mut identity: LocalIdentity, principal: &Principal) -> Result<LocalIdentity> {
        if identity.refresh_from(principal, self.clock.now()) {
            self.store.update(identity.clone()).await?;
            debug!(subject = %identity.subject, id = identity.id, "Refreshed local identity");
        }
        Ok(identity)
    }
}
