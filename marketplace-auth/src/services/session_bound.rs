//! Session-bound hardened authenticator backed by the session cache.
//!
//! Failed attempts are counted per email and per caller IP. Reaching the
//! limit locks the email for the lockout window. Access and refresh tokens
//! carry a session id in `jti`; a token is only valid while its session
//! record exists, so revocation is deleting those records. Refresh records
//! are consumed on redemption.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::{record_quietly, AuditSink};
use super::hardened::{
    HardenedAuthenticator, HardenedError, HardenedFactory, HardenedSession, SecurityRejection,
};
use super::hashing::CredentialHasher;
use super::session_cache::{RedisSessionCache, SessionCache};
use super::store::IdentityStore;
use super::tokens::{TokenClaims, TokenError, TokenKind, TokenService};
use crate::config::BruteForceConfig;
use crate::models::{AuditEvent, AuditEventType, AuditOutcome, Identity};

/// Per-IP budget relative to the per-email limit; shared NATs see many users.
const IP_ATTEMPT_MULTIPLIER: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct BruteForcePolicy {
    pub max_attempts: u32,
    pub lockout_seconds: u64,
}

impl From<&BruteForceConfig> for BruteForcePolicy {
    fn from(config: &BruteForceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            lockout_seconds: config.lockout_seconds,
        }
    }
}

fn attempts_key(email: &str) -> String {
    format!("auth:attempts:email:{}", email)
}

fn ip_attempts_key(ip: &str) -> String {
    format!("auth:attempts:ip:{}", ip)
}

fn lockout_key(email: &str) -> String {
    format!("auth:lockout:{}", email)
}

fn session_key(session_id: &str) -> String {
    format!("auth:session:{}", session_id)
}

fn refresh_key(session_id: &str) -> String {
    format!("auth:refresh:{}", session_id)
}

fn ttl_seconds(ttl: chrono::Duration) -> u64 {
    u64::try_from(ttl.num_seconds()).unwrap_or(1).max(1)
}

/// Expired tokens are a caller-visible rejection; anything else is internal.
fn token_failure(e: TokenError) -> HardenedError {
    if e.is_expired() {
        HardenedError::Security(SecurityRejection::TokenExpired)
    } else {
        HardenedError::Internal(anyhow::anyhow!(e))
    }
}

pub struct SessionBoundAuthenticator {
    store: Arc<dyn IdentityStore>,
    cache: Arc<dyn SessionCache>,
    hasher: CredentialHasher,
    tokens: TokenService,
    audit: Arc<dyn AuditSink>,
    policy: BruteForcePolicy,
}

impl SessionBoundAuthenticator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        cache: Arc<dyn SessionCache>,
        hasher: CredentialHasher,
        tokens: TokenService,
        audit: Arc<dyn AuditSink>,
        policy: BruteForcePolicy,
    ) -> Self {
        Self {
            store,
            cache,
            hasher,
            tokens,
            audit,
            policy,
        }
    }

    fn locked(&self) -> HardenedError {
        HardenedError::Security(SecurityRejection::AccountLocked {
            retry_after_secs: Some(self.policy.lockout_seconds),
        })
    }

    async fn record_failure(
        &self,
        email: &str,
        ip: Option<&str>,
        subject: Option<String>,
    ) -> Result<(), HardenedError> {
        let count = self
            .cache
            .incr(&attempts_key(email), self.policy.lockout_seconds)
            .await?;
        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            self.cache
                .incr(&ip_attempts_key(ip), self.policy.lockout_seconds)
                .await?;
        }

        record_quietly(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventType::AuthenticationFailure,
                subject.clone(),
                AuditOutcome::Failure,
            )
            .with_caller(ip, None)
            .with_details(serde_json::json!({ "failed_attempts": count })),
        )
        .await;

        if count >= i64::from(self.policy.max_attempts) {
            self.cache
                .set(&lockout_key(email), "locked", self.policy.lockout_seconds)
                .await?;
            tracing::warn!(failed_attempts = count, "Account locked after repeated failures");
            record_quietly(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::AccountLocked, subject, AuditOutcome::Failure)
                    .with_caller(ip, None),
            )
            .await;
            return Err(self.locked());
        }

        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<i64, HardenedError> {
        Ok(self
            .cache
            .get(key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl HardenedAuthenticator for SessionBoundAuthenticator {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
    ) -> Result<Option<Identity>, HardenedError> {
        if self.cache.get(&lockout_key(email)).await?.is_some() {
            return Err(self.locked());
        }

        let record = self
            .store
            .find_by_email(email)
            .await
            .map_err(|e| HardenedError::Internal(anyhow::anyhow!(e)))?;

        let identity = match record {
            Some(record) if record.is_active => {
                if self.hasher.verify(password, &record.password_digest).await {
                    Some(record.to_identity())
                } else {
                    self.record_failure(email, ip, Some(record.id.to_string()))
                        .await?;
                    None
                }
            }
            Some(record) => {
                tracing::info!(user_id = %record.id, "Login attempt for inactive identity");
                self.record_failure(email, ip, Some(record.id.to_string()))
                    .await?;
                None
            }
            None => {
                self.record_failure(email, ip, None).await?;
                None
            }
        };

        if identity.is_some() {
            self.cache.delete(&attempts_key(email)).await?;
        }

        Ok(identity)
    }

    async fn create_session(&self, identity: &Identity) -> Result<HardenedSession, HardenedError> {
        let session_id = Uuid::new_v4().to_string();
        let subject = identity.subject();
        let access_ttl = self.tokens.access_ttl();
        let refresh_ttl = self.tokens.refresh_ttl();

        let access_token = self
            .tokens
            .issue_with_reference(&subject, TokenKind::Access, access_ttl, &session_id)
            .map_err(|e| HardenedError::Internal(anyhow::anyhow!(e)))?;
        let refresh_token = self
            .tokens
            .issue_with_reference(&subject, TokenKind::Refresh, refresh_ttl, &session_id)
            .map_err(|e| HardenedError::Internal(anyhow::anyhow!(e)))?;

        self.cache
            .set(&session_key(&session_id), &subject, ttl_seconds(access_ttl))
            .await?;
        self.cache
            .set(&refresh_key(&session_id), &subject, ttl_seconds(refresh_ttl))
            .await?;

        Ok(HardenedSession {
            access_token,
            refresh_token,
        })
    }

    async fn verify(&self, token: &str) -> Result<TokenClaims, HardenedError> {
        let claims = self
            .tokens
            .verify_kind(token, TokenKind::Access)
            .map_err(token_failure)?;

        match self.cache.get(&session_key(&claims.jti)).await? {
            Some(subject) if subject == claims.sub => Ok(claims),
            _ => Err(HardenedError::Security(SecurityRejection::SessionRevoked)),
        }
    }

    async fn redeem_refresh(&self, token: &str) -> Result<TokenClaims, HardenedError> {
        let claims = self
            .tokens
            .verify_kind(token, TokenKind::Refresh)
            .map_err(token_failure)?;

        let key = refresh_key(&claims.jti);
        match self.cache.get(&key).await? {
            Some(subject) if subject == claims.sub => {}
            _ => return Err(HardenedError::Security(SecurityRejection::SessionRevoked)),
        }

        // Losing the delete race means another caller already redeemed it.
        if !self.cache.delete(&key).await? {
            return Err(HardenedError::Security(SecurityRejection::SessionRevoked));
        }

        Ok(claims)
    }

    async fn revoke(&self, identity_id: &str, token: &str) -> Result<bool, HardenedError> {
        let claims = match self.tokens.verify_kind(token, TokenKind::Access) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::info!(error = %e, "Revocation requested for an unusable token");
                return Ok(false);
            }
        };

        if claims.sub != identity_id {
            tracing::warn!(
                token_subject = %claims.sub,
                requested_subject = %identity_id,
                "Revocation subject mismatch"
            );
            return Ok(false);
        }

        let access = self.cache.delete(&session_key(&claims.jti)).await?;
        let refresh = self.cache.delete(&refresh_key(&claims.jti)).await?;
        Ok(access || refresh)
    }

    async fn check_attempts(
        &self,
        email: Option<&str>,
        ip: Option<&str>,
    ) -> Result<bool, HardenedError> {
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            if self.cache.get(&lockout_key(email)).await?.is_some() {
                return Ok(false);
            }
            if self.counter(&attempts_key(email)).await? >= i64::from(self.policy.max_attempts) {
                return Ok(false);
            }
        }

        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            let limit = i64::from(self.policy.max_attempts.saturating_mul(IP_ATTEMPT_MULTIPLIER));
            if self.counter(&ip_attempts_key(ip)).await? >= limit {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn health(&self) -> Result<serde_json::Value, HardenedError> {
        self.cache.health_check().await?;
        self.store
            .health_check()
            .await
            .map_err(|e| HardenedError::Internal(anyhow::anyhow!(e)))?;

        Ok(serde_json::json!({
            "status": "healthy",
            "session_cache": "up",
            "identity_store": "up",
            "max_attempts": self.policy.max_attempts,
            "lockout_seconds": self.policy.lockout_seconds,
        }))
    }
}

/// Where the factory gets its session cache from.
pub enum CacheSource {
    Redis { url: String, connect_timeout: Duration },
    Ready(Arc<dyn SessionCache>),
}

/// Builds a [`SessionBoundAuthenticator`], connecting to the cache on demand.
pub struct SessionBoundFactory {
    cache: CacheSource,
    store: Arc<dyn IdentityStore>,
    hasher: CredentialHasher,
    tokens: TokenService,
    audit: Arc<dyn AuditSink>,
    policy: BruteForcePolicy,
}

impl SessionBoundFactory {
    pub fn new(
        cache: CacheSource,
        store: Arc<dyn IdentityStore>,
        hasher: CredentialHasher,
        tokens: TokenService,
        audit: Arc<dyn AuditSink>,
        policy: BruteForcePolicy,
    ) -> Self {
        Self {
            cache,
            store,
            hasher,
            tokens,
            audit,
            policy,
        }
    }
}

#[async_trait]
impl HardenedFactory for SessionBoundFactory {
    async fn build(&self) -> Result<Arc<dyn HardenedAuthenticator>, anyhow::Error> {
        let cache: Arc<dyn SessionCache> = match &self.cache {
            CacheSource::Redis {
                url,
                connect_timeout,
            } => {
                let cache = tokio::time::timeout(*connect_timeout, RedisSessionCache::connect(url))
                    .await
                    .map_err(|_| {
                        anyhow::anyhow!("Session cache connect timed out after {:?}", connect_timeout)
                    })??;
                Arc::new(cache)
            }
            CacheSource::Ready(cache) => cache.clone(),
        };

        tracing::info!("Hardened authenticator constructed");

        Ok(Arc::new(SessionBoundAuthenticator::new(
            self.store.clone(),
            cache,
            self.hasher.clone(),
            self.tokens.clone(),
            self.audit.clone(),
            self.policy,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, JwtConfig};
    use crate::models::{IdentityAttributes, IdentityRecord, Role};
    use crate::services::audit::MemoryAuditSink;
    use crate::services::hashing::WorkFactor;
    use crate::services::session_cache::MemorySessionCache;
    use crate::services::store::MemoryIdentityStore;
    use secrecy::SecretString;
    use std::time::Duration;

    struct Fixture {
        auth: SessionBoundAuthenticator,
        store: MemoryIdentityStore,
        cache: Arc<MemorySessionCache>,
        audit: MemoryAuditSink,
        tokens: TokenService,
    }

    async fn fixture(max_attempts: u32) -> Fixture {
        let hasher = CredentialHasher::with_work_factor(
            WorkFactor::for_environment(Environment::Test),
            1,
            8,
            Duration::from_secs(5),
        )
        .unwrap();
        let tokens = TokenService::new(&JwtConfig {
            secret: SecretString::new("session-bound-test-secret".to_string()),
            algorithm: jsonwebtoken::Algorithm::HS256,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        });
        let store = MemoryIdentityStore::new();
        store
            .seed(IdentityRecord::new(
                "a@x.com".to_string(),
                hasher.hash("Secret123").await.unwrap(),
                Role::Vendor,
                IdentityAttributes::default(),
            ))
            .unwrap();
        let cache = Arc::new(MemorySessionCache::new());
        let audit = MemoryAuditSink::new();

        let auth = SessionBoundAuthenticator::new(
            Arc::new(store.clone()),
            cache.clone(),
            hasher,
            tokens.clone(),
            Arc::new(audit.clone()),
            BruteForcePolicy {
                max_attempts,
                lockout_seconds: 60,
            },
        );

        Fixture {
            auth,
            store,
            cache,
            audit,
            tokens,
        }
    }

    #[tokio::test]
    async fn test_lockout_after_max_failures() {
        let f = fixture(3).await;

        for _ in 0..2 {
            let result = f.auth.authenticate("a@x.com", "wrong", Some("10.0.0.1")).await;
            assert!(matches!(result, Ok(None)));
        }
        let third = f.auth.authenticate("a@x.com", "wrong", Some("10.0.0.1")).await;
        assert!(matches!(
            third,
            Err(HardenedError::Security(SecurityRejection::AccountLocked { .. }))
        ));

        // Correct password is still refused while locked.
        let locked = f.auth.authenticate("a@x.com", "Secret123", None).await;
        assert!(matches!(
            locked,
            Err(HardenedError::Security(SecurityRejection::AccountLocked { .. }))
        ));
        assert!(!f.auth.check_attempts(Some("a@x.com"), None).await.unwrap());
        assert!(f
            .audit
            .event_types()
            .contains(&AuditEventType::AccountLocked));
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let f = fixture(3).await;
        f.auth.authenticate("a@x.com", "wrong", None).await.unwrap();
        f.auth.authenticate("a@x.com", "wrong", None).await.unwrap();
        assert!(f
            .auth
            .authenticate("a@x.com", "Secret123", None)
            .await
            .unwrap()
            .is_some());

        // Two more failures would have locked without the reset.
        f.auth.authenticate("a@x.com", "wrong", None).await.unwrap();
        f.auth.authenticate("a@x.com", "wrong", None).await.unwrap();
        assert!(f.auth.check_attempts(Some("a@x.com"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_identity_is_refused() {
        let f = fixture(5).await;
        let mut record = f.store.find_by_email("a@x.com").await.unwrap().unwrap();
        record.is_active = false;
        f.store.seed(record).unwrap();

        let result = f.auth.authenticate("a@x.com", "Secret123", None).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let f = fixture(5).await;
        let identity = f
            .auth
            .authenticate("a@x.com", "Secret123", None)
            .await
            .unwrap()
            .unwrap();

        let session = f.auth.create_session(&identity).await.unwrap();
        let claims = f.auth.verify(&session.access_token).await.unwrap();
        assert_eq!(claims.sub, identity.subject());

        assert!(!f.auth.revoke("someone-else", &session.access_token).await.unwrap());
        assert!(f
            .auth
            .revoke(&identity.subject(), &session.access_token)
            .await
            .unwrap());
        assert!(matches!(
            f.auth.verify(&session.access_token).await,
            Err(HardenedError::Security(SecurityRejection::SessionRevoked))
        ));
        assert!(matches!(
            f.auth.redeem_refresh(&session.refresh_token).await,
            Err(HardenedError::Security(SecurityRejection::SessionRevoked))
        ));
    }

    #[tokio::test]
    async fn test_refresh_tokens_redeem_once() {
        let f = fixture(5).await;
        let identity = f
            .auth
            .authenticate("a@x.com", "Secret123", None)
            .await
            .unwrap()
            .unwrap();
        let session = f.auth.create_session(&identity).await.unwrap();

        // The refresh token is not an access token.
        assert!(matches!(
            f.auth.verify(&session.refresh_token).await,
            Err(HardenedError::Internal(_))
        ));

        let claims = f.auth.redeem_refresh(&session.refresh_token).await.unwrap();
        assert_eq!(claims.sub, identity.subject());
        assert!(matches!(
            f.auth.redeem_refresh(&session.refresh_token).await,
            Err(HardenedError::Security(SecurityRejection::SessionRevoked))
        ));

        // Refresh tokens minted outside a session are never redeemable.
        let unbound = f.tokens.issue_refresh(&identity.subject()).unwrap();
        assert!(matches!(
            f.auth.redeem_refresh(&unbound).await,
            Err(HardenedError::Security(SecurityRejection::SessionRevoked))
        ));
    }

    #[tokio::test]
    async fn test_unbound_and_expired_tokens() {
        let f = fixture(5).await;

        let unbound = f.tokens.issue_access("42").unwrap();
        assert!(matches!(
            f.auth.verify(&unbound).await,
            Err(HardenedError::Security(SecurityRejection::SessionRevoked))
        ));

        let expired = f
            .tokens
            .issue("42", TokenKind::Access, chrono::Duration::seconds(-5))
            .unwrap();
        assert!(matches!(
            f.auth.verify(&expired).await,
            Err(HardenedError::Security(SecurityRejection::TokenExpired))
        ));

        assert!(matches!(
            f.auth.verify("garbage").await,
            Err(HardenedError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_outage_is_internal() {
        let f = fixture(5).await;
        f.cache.set_unavailable(true);
        assert!(matches!(
            f.auth.authenticate("a@x.com", "Secret123", None).await,
            Err(HardenedError::Internal(_))
        ));
        assert!(matches!(
            f.auth.check_attempts(Some("a@x.com"), None).await,
            Err(HardenedError::Internal(_))
        ));
        assert!(f.auth.health().await.is_err());
    }

    #[tokio::test]
    async fn test_ip_budget() {
        let f = fixture(1).await;
        // Unknown emails still count against the caller IP.
        for n in 0..IP_ATTEMPT_MULTIPLIER {
            let email = format!("ghost{}@x.com", n);
            let _ = f.auth.authenticate(&email, "wrong", Some("10.9.9.9")).await;
        }
        assert!(!f.auth.check_attempts(None, Some("10.9.9.9")).await.unwrap());
        assert!(f.auth.check_attempts(None, Some("10.1.1.1")).await.unwrap());
    }
}
