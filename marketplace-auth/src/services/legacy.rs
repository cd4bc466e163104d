//! Minimal credential check: store lookup plus digest verification.
//!
//! No brute-force protection and no audit trail. There is no error channel
//! either: a lookup failure reads the same as an unknown email.

use std::sync::Arc;
use std::time::Duration;

use super::hashing::CredentialHasher;
use super::store::IdentityStore;
use crate::models::Identity;

#[derive(Clone)]
pub struct LegacyAuthenticator {
    store: Arc<dyn IdentityStore>,
    hasher: CredentialHasher,
}

impl LegacyAuthenticator {
    pub fn new(store: Arc<dyn IdentityStore>, hasher: CredentialHasher) -> Self {
        Self { store, hasher }
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Option<Identity> {
        self.authenticate_within(email, password, self.hasher.default_timeout())
            .await
    }

    pub async fn authenticate_within(
        &self,
        email: &str,
        password: &str,
        timeout: Duration,
    ) -> Option<Identity> {
        let record = match self.store.find_by_email(email).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Legacy identity lookup failed");
                return None;
            }
        };

        if !self
            .hasher
            .verify_within(password, &record.password_digest, timeout)
            .await
        {
            return None;
        }

        Some(record.to_identity())
    }
}
