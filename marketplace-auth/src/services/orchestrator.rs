//! Authentication orchestrator.
//!
//! Single entry point for credential checks, sessions, token verification,
//! logout, brute-force checks and identity lifecycle. Every call reads the
//! mode flag once, resolves it into an [`ActivePath`] and runs to completion
//! on that path, so an operator flipping the flag affects only later calls.
//!
//! Error contract:
//! - security rejections from the hardened path reach the caller unchanged
//! - infrastructure failures collapse into the operation's generic outcome
//! - identity writes propagate duplicate and persistence failures

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::audit::{record_quietly, AuditSink};
use super::error::AuthError;
use super::hardened::{HardenedAuthenticator, HardenedError, HardenedFactory};
use super::hashing::CredentialHasher;
use super::legacy::LegacyAuthenticator;
use super::mode::{AuthMode, ModeFlag};
use super::store::IdentityStore;
use super::tokens::{SessionTokens, TokenClaims, TokenKind, TokenService};
use crate::config::AuthConfig;
use crate::models::{
    AuditEvent, AuditEventType, AuditOutcome, Identity, IdentityAttributes, IdentityId,
    IdentityRecord, Role,
};

/// Caller details carried into audit events and used to bound slow calls.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn audit(&self, event: AuditEvent) -> AuditEvent {
        event.with_caller(self.ip.as_deref(), self.user_agent.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub service_name: String,
    pub token_verify_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            service_name: "auth-orchestrator".to_string(),
            token_verify_timeout: Duration::from_millis(2000),
        }
    }
}

impl From<&AuthConfig> for OrchestratorSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            service_name: config.common.service_name.clone(),
            token_verify_timeout: Duration::from_millis(config.mode.token_verify_timeout_ms),
        }
    }
}

/// Health report. Building it never fails.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub mode: AuthMode,
    pub legacy_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardened: Option<serde_json::Value>,
}

/// The path a single call runs on.
///
/// `Unavailable` means secure mode is selected but the hardened path could
/// not be built; such calls take the generic failure outcome and never fall
/// back to the legacy path.
enum ActivePath {
    Legacy,
    Secure(Arc<dyn HardenedAuthenticator>),
    Unavailable,
}

impl ActivePath {
    fn mode(&self) -> AuthMode {
        match self {
            ActivePath::Legacy => AuthMode::Legacy,
            ActivePath::Secure(_) | ActivePath::Unavailable => AuthMode::Secure,
        }
    }
}

pub struct AuthOrchestrator {
    store: Arc<dyn IdentityStore>,
    hasher: CredentialHasher,
    tokens: TokenService,
    legacy: LegacyAuthenticator,
    audit: Arc<dyn AuditSink>,
    factory: Arc<dyn HardenedFactory>,
    hardened: OnceCell<Arc<dyn HardenedAuthenticator>>,
    mode: ModeFlag,
    settings: OrchestratorSettings,
}

impl AuthOrchestrator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        hasher: CredentialHasher,
        tokens: TokenService,
        audit: Arc<dyn AuditSink>,
        factory: Arc<dyn HardenedFactory>,
        mode: ModeFlag,
        settings: OrchestratorSettings,
    ) -> Self {
        let legacy = LegacyAuthenticator::new(store.clone(), hasher.clone());

        tracing::info!(
            mode = %mode.current(),
            service = %settings.service_name,
            "Authentication orchestrator initialized"
        );

        Self {
            store,
            hasher,
            tokens,
            legacy,
            audit,
            factory,
            hardened: OnceCell::new(),
            mode,
            settings,
        }
    }

    /// Shared handle to the mode flag for the operator path.
    pub fn mode_flag(&self) -> &ModeFlag {
        &self.mode
    }

    pub fn mode(&self) -> AuthMode {
        self.mode.current()
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    /// Build the hardened path on first use; concurrent first callers share
    /// one construction. A failed build leaves the cell empty for a retry.
    async fn hardened(&self) -> Result<Arc<dyn HardenedAuthenticator>, anyhow::Error> {
        self.hardened
            .get_or_try_init(|| async {
                tracing::info!("Constructing hardened authentication path");
                self.factory.build().await
            })
            .await
            .map(Arc::clone)
    }

    /// Resolve the path for one call. Construction counts against the
    /// caller's time limit; a construction cut short leaves the cell empty.
    async fn resolve(&self, timeout: Option<Duration>) -> ActivePath {
        match self.mode.current() {
            AuthMode::Legacy => ActivePath::Legacy,
            AuthMode::Secure => {
                let built = bounded(timeout, async {
                    self.hardened().await.map_err(HardenedError::Internal)
                })
                .await;
                match built {
                    Ok(hardened) => ActivePath::Secure(hardened),
                    Err(e) => {
                        tracing::error!(error = %e, "Hardened authentication path unavailable");
                        ActivePath::Unavailable
                    }
                }
            }
        }
    }

    async fn record(&self, ctx: &AuthContext, event: AuditEvent) {
        record_quietly(self.audit.as_ref(), ctx.audit(event)).await;
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Check a credential pair.
    ///
    /// `Ok(None)` covers wrong passwords, unknown emails and internal
    /// failures alike. `Err` only carries security rejections.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        ctx: &AuthContext,
    ) -> Result<Option<Identity>, AuthError> {
        let started = Instant::now();
        let path = self.resolve(ctx.timeout).await;

        let hardened = match path {
            ActivePath::Legacy => {
                let timeout = ctx.timeout.unwrap_or_else(|| self.hasher.default_timeout());
                return Ok(self.legacy.authenticate_within(email, password, timeout).await);
            }
            ActivePath::Secure(hardened) => Some(hardened),
            ActivePath::Unavailable => None,
        };

        self.record(
            ctx,
            AuditEvent::new(
                AuditEventType::AuthenticationAttempt,
                None,
                AuditOutcome::Attempted,
            )
            .with_details(serde_json::json!({ "email": email })),
        )
        .await;

        let Some(hardened) = hardened else {
            return Ok(None);
        };

        let outcome = bounded(
            remaining(ctx.timeout, started),
            hardened.authenticate(email, password, ctx.ip.as_deref()),
        )
        .await;

        match outcome {
            Ok(Some(identity)) => {
                self.record(
                    ctx,
                    AuditEvent::new(
                        AuditEventType::AuthenticationSuccess,
                        Some(identity.subject()),
                        AuditOutcome::Success,
                    ),
                )
                .await;
                Ok(Some(identity))
            }
            Ok(None) => Ok(None),
            Err(HardenedError::Security(rejection)) => {
                tracing::info!(rejection = %rejection, "Authentication rejected by policy");
                Err(AuthError::Security(rejection))
            }
            Err(HardenedError::Internal(e)) => {
                tracing::error!(error = %e, "Hardened authentication failed");
                Ok(None)
            }
        }
    }

    /// Issue an access/refresh pair for an authenticated identity.
    pub async fn create_user_session(
        &self,
        identity: &Identity,
        ctx: &AuthContext,
    ) -> Result<SessionTokens, AuthError> {
        let started = Instant::now();
        let path = self.resolve(ctx.timeout).await;
        self.open_session(path, identity, ctx, started).await
    }

    async fn open_session(
        &self,
        path: ActivePath,
        identity: &Identity,
        ctx: &AuthContext,
        started: Instant,
    ) -> Result<SessionTokens, AuthError> {
        let subject = identity.subject();
        let mode = path.mode();

        let (access_token, refresh_token) = match path {
            ActivePath::Legacy => {
                let pair = self
                    .tokens
                    .issue_access(&subject)
                    .and_then(|access| Ok((access, self.tokens.issue_refresh(&subject)?)));
                pair.map_err(|e| {
                    tracing::error!(error = %e, "Token issuance failed");
                    AuthError::SessionCreationFailed
                })?
            }
            ActivePath::Secure(hardened) => {
                let session = bounded(
                    remaining(ctx.timeout, started),
                    hardened.create_session(identity),
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Hardened session creation failed");
                    AuthError::SessionCreationFailed
                })?;
                (session.access_token, session.refresh_token)
            }
            ActivePath::Unavailable => return Err(AuthError::SessionCreationFailed),
        };

        if mode == AuthMode::Secure {
            self.record(
                ctx,
                AuditEvent::new(
                    AuditEventType::SessionCreated,
                    Some(subject.clone()),
                    AuditOutcome::Success,
                ),
            )
            .await;
        }

        tracing::debug!(user_id = %subject, mode = %mode, "Session created");

        Ok(SessionTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_token_expiry_seconds(),
        })
    }

    /// Trade a refresh token for a new session.
    ///
    /// In secure mode the refresh token is bound to its session: it redeems
    /// once and dies with logout. Every refresh failure reads as
    /// `Unauthenticated`.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        ctx: &AuthContext,
    ) -> Result<SessionTokens, AuthError> {
        let started = Instant::now();
        let path = self.resolve(ctx.timeout).await;

        let claims = match &path {
            ActivePath::Legacy => self
                .tokens
                .verify_kind(refresh_token, TokenKind::Refresh)
                .map_err(|e| {
                    tracing::debug!(error = %e, "Refresh token rejected");
                    AuthError::Unauthenticated
                })?,
            ActivePath::Secure(hardened) => {
                bounded(
                    remaining(ctx.timeout, started),
                    hardened.redeem_refresh(refresh_token),
                )
                .await
                .map_err(|e| {
                    tracing::debug!(error = %e, "Refresh token rejected");
                    AuthError::Unauthenticated
                })?
            }
            ActivePath::Unavailable => return Err(AuthError::Unauthenticated),
        };

        let id = IdentityId::parse(&claims.sub);
        let record = match self.store.find_by_id(&id).await {
            Ok(Some(record)) if record.is_active => record,
            Ok(_) => return Err(AuthError::Unauthenticated),
            Err(e) => {
                tracing::warn!(error = %e, "Identity lookup failed during refresh");
                return Err(AuthError::Unauthenticated);
            }
        };

        self.open_session(path, &record.to_identity(), ctx, started)
            .await
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    pub async fn verify_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_token_within(token, self.settings.token_verify_timeout)
            .await
    }

    /// Verify an access token. Verification has no side effects.
    pub async fn verify_token_within(
        &self,
        token: &str,
        timeout: Duration,
    ) -> Result<TokenClaims, AuthError> {
        let started = Instant::now();
        match self.resolve(Some(timeout)).await {
            ActivePath::Legacy => self.tokens.verify_kind(token, TokenKind::Access).map_err(|e| {
                tracing::debug!(error = %e, "Token verification failed");
                AuthError::Unauthenticated
            }),
            ActivePath::Secure(hardened) => {
                match bounded(remaining(Some(timeout), started), hardened.verify(token)).await {
                    Ok(claims) => Ok(claims),
                    Err(HardenedError::Security(rejection)) => Err(AuthError::Security(rejection)),
                    Err(HardenedError::Internal(e)) => {
                        tracing::debug!(error = %e, "Token verification failed");
                        Err(AuthError::Unauthenticated)
                    }
                }
            }
            ActivePath::Unavailable => Err(AuthError::Unauthenticated),
        }
    }

    /// Revoke the session behind `token`.
    ///
    /// Legacy mode keeps no session state, so logout always reports success
    /// there and the token stays valid until it expires.
    pub async fn logout_user(&self, identity_id: &str, token: &str, ctx: &AuthContext) -> bool {
        let started = Instant::now();
        let revoked = match self.resolve(ctx.timeout).await {
            ActivePath::Legacy => return true,
            ActivePath::Secure(hardened) => {
                let call = hardened.revoke(identity_id, token);
                match bounded(remaining(ctx.timeout, started), call).await {
                    Ok(revoked) => revoked,
                    Err(e) => {
                        tracing::error!(error = %e, user_id = %identity_id, "Session revocation failed");
                        false
                    }
                }
            }
            ActivePath::Unavailable => false,
        };

        let outcome = if revoked {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        self.record(
            ctx,
            AuditEvent::new(
                AuditEventType::Logout,
                Some(identity_id.to_string()),
                outcome,
            ),
        )
        .await;

        revoked
    }

    /// Whether a login attempt may proceed.
    ///
    /// Fails open: internal errors allow the attempt so that an unrelated
    /// outage cannot lock every user out.
    pub async fn check_brute_force_protection(
        &self,
        email: Option<&str>,
        ip: Option<&str>,
        ctx: &AuthContext,
    ) -> bool {
        let started = Instant::now();
        match self.resolve(ctx.timeout).await {
            ActivePath::Legacy | ActivePath::Unavailable => true,
            ActivePath::Secure(hardened) => {
                let call = hardened.check_attempts(email, ip);
                match bounded(remaining(ctx.timeout, started), call).await {
                    Ok(allowed) => allowed,
                    Err(HardenedError::Security(rejection)) => {
                        tracing::info!(rejection = %rejection, "Attempt refused by policy");
                        false
                    }
                    Err(HardenedError::Internal(e)) => {
                        tracing::warn!(error = %e, "Brute-force check failed, allowing attempt");
                        true
                    }
                }
            }
        }
    }

    // ========================================================================
    // Identity lifecycle
    // ========================================================================

    /// Register a new identity.
    ///
    /// The duplicate check is an exact-string email match. Unknown roles are
    /// stored as buyer. Nothing is written unless the whole insert commits.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        role: Option<&str>,
        attrs: IdentityAttributes,
        ctx: &AuthContext,
    ) -> Result<Identity, AuthError> {
        if self.store.find_by_email(email).await?.is_some() {
            return Err(AuthError::DuplicateIdentity);
        }

        let timeout = ctx.timeout.unwrap_or_else(|| self.hasher.default_timeout());
        let digest = self.hasher.hash_within(password, timeout).await?;
        let role = Role::from_optional(role);
        let record = IdentityRecord::new(email.to_string(), digest, role, attrs);

        self.persist(&record, true).await?;

        let identity = record.to_identity();
        tracing::info!(user_id = %record.id, role = %role, "Identity created");

        if self.mode.is_secure() {
            self.record(
                ctx,
                AuditEvent::new(
                    AuditEventType::IdentityCreated,
                    Some(identity.subject()),
                    AuditOutcome::Success,
                )
                .with_details(serde_json::json!({ "role": role.as_str() })),
            )
            .await;
        }

        Ok(identity)
    }

    pub async fn reset_password(
        &self,
        identity_id: &IdentityId,
        new_password: &str,
        ctx: &AuthContext,
    ) -> Result<(), AuthError> {
        let mut record = self.load(identity_id).await?;

        let timeout = ctx.timeout.unwrap_or_else(|| self.hasher.default_timeout());
        record.password_digest = self.hasher.hash_within(new_password, timeout).await?;
        record.updated_utc = chrono::Utc::now();
        self.persist(&record, false).await?;

        tracing::info!(user_id = %identity_id, "Password reset");
        self.record_lifecycle(ctx, AuditEventType::PasswordReset, identity_id, None)
            .await;
        Ok(())
    }

    /// Change an identity's role. Unrecognized roles become buyer.
    pub async fn change_role(
        &self,
        identity_id: &IdentityId,
        role: &str,
        ctx: &AuthContext,
    ) -> Result<Identity, AuthError> {
        let mut record = self.load(identity_id).await?;
        let previous = Role::from_optional(record.role.as_deref());
        let role = Role::from_stored(role);

        record.role = Some(role.as_str().to_string());
        record.updated_utc = chrono::Utc::now();
        self.persist(&record, false).await?;

        tracing::info!(user_id = %identity_id, from = %previous, to = %role, "Role changed");
        self.record_lifecycle(
            ctx,
            AuditEventType::RoleChanged,
            identity_id,
            Some(serde_json::json!({ "from": previous.as_str(), "to": role.as_str() })),
        )
        .await;

        Ok(record.to_identity())
    }

    /// Activate or deactivate an identity. Identities are never deleted.
    pub async fn set_active(
        &self,
        identity_id: &IdentityId,
        active: bool,
        ctx: &AuthContext,
    ) -> Result<Identity, AuthError> {
        let mut record = self.load(identity_id).await?;
        record.is_active = active;
        record.updated_utc = chrono::Utc::now();
        self.persist(&record, false).await?;

        let event = if active {
            AuditEventType::IdentityActivated
        } else {
            AuditEventType::IdentityDeactivated
        };
        tracing::info!(user_id = %identity_id, active, "Identity status changed");
        self.record_lifecycle(ctx, event, identity_id, None).await;

        Ok(record.to_identity())
    }

    async fn load(&self, identity_id: &IdentityId) -> Result<IdentityRecord, AuthError> {
        self.store
            .find_by_id(identity_id)
            .await?
            .ok_or(AuthError::IdentityNotFound)
    }

    /// Write one record in its own transaction, rolling back on failure.
    async fn persist(&self, record: &IdentityRecord, insert: bool) -> Result<(), AuthError> {
        let mut tx = self.store.begin().await?;

        let written = if insert {
            tx.insert(record).await
        } else {
            tx.update(record).await
        };

        if let Err(e) = written {
            tracing::warn!(user_id = %record.id, error = %e, "Identity write failed, rolling back");
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "Rollback failed");
            }
            return Err(e.into());
        }

        tx.commit().await.map_err(|e| {
            tracing::warn!(user_id = %record.id, error = %e, "Identity commit failed");
            AuthError::from(e)
        })
    }

    async fn record_lifecycle(
        &self,
        ctx: &AuthContext,
        event_type: AuditEventType,
        identity_id: &IdentityId,
        details: Option<serde_json::Value>,
    ) {
        if !self.mode.is_secure() {
            return;
        }
        let mut event = AuditEvent::new(
            event_type,
            Some(identity_id.to_string()),
            AuditOutcome::Success,
        );
        if let Some(details) = details {
            event = event.with_details(details);
        }
        self.record(ctx, event).await;
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Report the active mode and hardened-path status. Bounded by the token
    /// verification timeout, so it never hangs on an unreachable cache.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let limit = Some(self.settings.token_verify_timeout);
        let path = self.resolve(limit).await;
        let mode = path.mode();

        let hardened = match path {
            ActivePath::Legacy => None,
            ActivePath::Secure(hardened) => {
                match bounded(remaining(limit, started), hardened.health()).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        tracing::warn!(error = %e, "Hardened health check failed");
                        Some(serde_json::json!({ "status": "error" }))
                    }
                }
            }
            ActivePath::Unavailable => Some(serde_json::json!({ "status": "error" })),
        };

        HealthReport {
            service: self.settings.service_name.clone(),
            mode,
            legacy_available: true,
            hardened,
        }
    }

    /// Release the hashing pool. Later hashing calls fail.
    pub async fn shutdown(&self, grace: Duration) {
        self.hasher.shutdown(grace).await;
    }
}

/// What is left of `timeout` after the time spent since `started`.
fn remaining(timeout: Option<Duration>, started: Instant) -> Option<Duration> {
    timeout.map(|limit| limit.saturating_sub(started.elapsed()))
}

async fn bounded<T, F>(timeout: Option<Duration>, call: F) -> Result<T, HardenedError>
where
    F: Future<Output = Result<T, HardenedError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            HardenedError::Internal(anyhow::anyhow!("Hardened call timed out after {:?}", limit))
        })?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out_as_internal() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, HardenedError>(1)
        };
        let result = bounded(Some(Duration::from_millis(10)), slow).await;
        assert!(matches!(result, Err(HardenedError::Internal(_))));

        let fast = async { Ok::<_, HardenedError>(2) };
        assert_eq!(bounded(None, fast).await.unwrap(), 2);
    }

    #[test]
    fn test_remaining_shrinks_with_elapsed_time() {
        let started = Instant::now()
            .checked_sub(Duration::from_millis(300))
            .unwrap();

        let left = remaining(Some(Duration::from_secs(1)), started).unwrap();
        assert!(left <= Duration::from_millis(700));
        assert!(left > Duration::ZERO);
        assert_eq!(
            remaining(Some(Duration::from_millis(100)), started),
            Some(Duration::ZERO)
        );
        assert_eq!(remaining(None, started), None);
    }

    #[test]
    fn test_context_builder() {
        let ctx = AuthContext::new()
            .with_ip("10.0.0.1")
            .with_user_agent("curl/8")
            .with_timeout(Duration::from_secs(1));
        let event = ctx.audit(AuditEvent::new(
            AuditEventType::Logout,
            None,
            AuditOutcome::Success,
        ));
        assert_eq!(event.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.user_agent.as_deref(), Some("curl/8"));
    }
}
