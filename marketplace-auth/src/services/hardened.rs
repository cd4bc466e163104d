//! Contract of the hardened authentication path.
//!
//! The hardened path adds brute-force counters, its own audit trail and
//! session-bound tokens. It is consumed through [`HardenedAuthenticator`] and
//! built on demand by a [`HardenedFactory`], since constructing it needs the
//! session cache and database pool.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::tokens::TokenClaims;
use crate::models::Identity;

/// Caller-actionable rejections. These cross the orchestrator unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityRejection {
    AccountLocked { retry_after_secs: Option<u64> },
    TooManyAttempts { retry_after_secs: Option<u64> },
    TokenExpired,
    SessionRevoked,
}

impl SecurityRejection {
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SecurityRejection::AccountLocked { retry_after_secs }
            | SecurityRejection::TooManyAttempts { retry_after_secs } => *retry_after_secs,
            SecurityRejection::TokenExpired | SecurityRejection::SessionRevoked => None,
        }
    }
}

impl fmt::Display for SecurityRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityRejection::AccountLocked { .. } => {
                f.write_str("Account temporarily locked, try again later")
            }
            SecurityRejection::TooManyAttempts { .. } => {
                f.write_str("Too many authentication attempts, try again later")
            }
            SecurityRejection::TokenExpired => f.write_str("Token expired"),
            SecurityRejection::SessionRevoked => f.write_str("Session has been revoked"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HardenedError {
    #[error("{0}")]
    Security(SecurityRejection),

    #[error("Hardened authenticator failure: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Token pair bound to one hardened session.
#[derive(Debug, Clone)]
pub struct HardenedSession {
    pub access_token: String,
    pub refresh_token: String,
}

#[async_trait]
pub trait HardenedAuthenticator: Send + Sync {
    /// `Ok(None)` means the credentials did not resolve.
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
    ) -> Result<Option<Identity>, HardenedError>;

    /// Issue a session-bound access/refresh pair.
    async fn create_session(&self, identity: &Identity) -> Result<HardenedSession, HardenedError>;

    async fn verify(&self, token: &str) -> Result<TokenClaims, HardenedError>;

    /// Consume a refresh token. Each refresh token redeems at most once and
    /// never after its session was revoked.
    async fn redeem_refresh(&self, token: &str) -> Result<TokenClaims, HardenedError>;

    async fn revoke(&self, identity_id: &str, token: &str) -> Result<bool, HardenedError>;

    /// `true` when another attempt is allowed.
    async fn check_attempts(
        &self,
        email: Option<&str>,
        ip: Option<&str>,
    ) -> Result<bool, HardenedError>;

    async fn health(&self) -> Result<serde_json::Value, HardenedError>;
}

/// Builds the hardened path. Called at most once per successful build.
#[async_trait]
pub trait HardenedFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn HardenedAuthenticator>, anyhow::Error>;
}

/// Factory that hands out an already constructed authenticator.
pub struct StaticHardenedFactory {
    authenticator: Arc<dyn HardenedAuthenticator>,
}

impl StaticHardenedFactory {
    pub fn new(authenticator: Arc<dyn HardenedAuthenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl HardenedFactory for StaticHardenedFactory {
    async fn build(&self) -> Result<Arc<dyn HardenedAuthenticator>, anyhow::Error> {
        Ok(self.authenticator.clone())
    }
}
