//! Common test utilities for orchestrator integration tests.
//!
//! Everything runs in-process: memory identity store, memory session cache
//! and memory audit sink. The hardened path is the session-bound
//! implementation wrapped in a fault injector.

#![allow(dead_code)]

use async_trait::async_trait;
use marketplace_auth::config::{Environment, JwtConfig};
use marketplace_auth::models::{Identity, IdentityAttributes};
use marketplace_auth::services::{
    AuthContext, AuthMode, AuthOrchestrator, BruteForcePolicy, CredentialHasher,
    HardenedAuthenticator, HardenedError, HardenedFactory, HardenedSession, MemoryAuditSink, MemoryIdentityStore,
    MemorySessionCache, ModeFlag, OrchestratorSettings, SecurityRejection,
    SessionBoundAuthenticator, StaticHardenedFactory, TokenClaims, TokenService, WorkFactor,
};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PASSWORD: &str = "Secret123";

/// Default brute-force limit used by the harness.
pub const MAX_ATTEMPTS: u32 = 5;

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: SecretString::new("integration-test-signing-secret".to_string()),
        algorithm: jsonwebtoken::Algorithm::HS256,
        access_token_expiry_minutes: 15,
        refresh_token_expiry_days: 7,
    }
}

pub fn test_hasher() -> CredentialHasher {
    CredentialHasher::with_work_factor(
        WorkFactor::for_environment(Environment::Test),
        2,
        32,
        Duration::from_secs(5),
    )
    .expect("hasher should start")
}

pub fn ctx() -> AuthContext {
    AuthContext::new()
        .with_ip("203.0.113.7")
        .with_user_agent("integration-tests/1.0")
}

/// Fault applied to every hardened call while set.
#[derive(Debug, Clone)]
pub enum Fault {
    Internal,
    Security(SecurityRejection),
}

impl Fault {
    fn error(&self) -> HardenedError {
        match self {
            Fault::Internal => HardenedError::Internal(anyhow::anyhow!("injected hardened failure")),
            Fault::Security(rejection) => HardenedError::Security(rejection.clone()),
        }
    }
}

/// Hardened path that can be told to fail or stall.
pub struct FaultyHardened {
    inner: Arc<dyn HardenedAuthenticator>,
    fault: Mutex<Option<Fault>>,
    delay: Mutex<Duration>,
}

impl FaultyHardened {
    pub fn new(inner: Arc<dyn HardenedAuthenticator>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn inject(&self, fault: Option<Fault>) {
        *self.fault.lock().unwrap() = fault;
    }

    /// Stall every hardened call by `delay` before it runs.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn check(&self) -> Result<(), HardenedError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.fault.lock().unwrap().as_ref() {
            Some(fault) => Err(fault.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HardenedAuthenticator for FaultyHardened {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
    ) -> Result<Option<Identity>, HardenedError> {
        self.check().await?;
        self.inner.authenticate(email, password, ip).await
    }

    async fn create_session(&self, identity: &Identity) -> Result<HardenedSession, HardenedError> {
        self.check().await?;
        self.inner.create_session(identity).await
    }

    async fn verify(&self, token: &str) -> Result<TokenClaims, HardenedError> {
        self.check().await?;
        self.inner.verify(token).await
    }

    async fn redeem_refresh(&self, token: &str) -> Result<TokenClaims, HardenedError> {
        self.check().await?;
        self.inner.redeem_refresh(token).await
    }

    async fn revoke(&self, identity_id: &str, token: &str) -> Result<bool, HardenedError> {
        self.check().await?;
        self.inner.revoke(identity_id, token).await
    }

    async fn check_attempts(
        &self,
        email: Option<&str>,
        ip: Option<&str>,
    ) -> Result<bool, HardenedError> {
        self.check().await?;
        self.inner.check_attempts(email, ip).await
    }

    async fn health(&self) -> Result<serde_json::Value, HardenedError> {
        self.check().await?;
        self.inner.health().await
    }
}

/// Factory that counts constructions and can be made to fail or stall.
pub struct CountingFactory {
    inner: StaticHardenedFactory,
    attempts: AtomicUsize,
    builds: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Mutex<Duration>,
}

impl CountingFactory {
    pub fn new(hardened: Arc<FaultyHardened>) -> Self {
        Self {
            inner: StaticHardenedFactory::new(hardened),
            attempts: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardenedFactory for CountingFactory {
    async fn build(&self) -> Result<Arc<dyn HardenedAuthenticator>, anyhow::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("session cache unreachable");
        }

        let built = self.inner.build().await?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(built)
    }
}

pub struct Harness {
    pub orchestrator: AuthOrchestrator,
    pub store: MemoryIdentityStore,
    pub cache: Arc<MemorySessionCache>,
    pub audit: MemoryAuditSink,
    pub mode: ModeFlag,
    pub tokens: TokenService,
    pub hardened: Arc<FaultyHardened>,
    pub factory: Arc<CountingFactory>,
}

impl Harness {
    pub fn new(mode: AuthMode) -> Self {
        let store = MemoryIdentityStore::new();
        let cache = Arc::new(MemorySessionCache::new());
        let audit = MemoryAuditSink::new();
        let hasher = test_hasher();
        let tokens = TokenService::new(&jwt_config());

        let session_bound = SessionBoundAuthenticator::new(
            Arc::new(store.clone()),
            cache.clone(),
            hasher.clone(),
            tokens.clone(),
            Arc::new(audit.clone()),
            BruteForcePolicy {
                max_attempts: MAX_ATTEMPTS,
                lockout_seconds: 900,
            },
        );
        let hardened = Arc::new(FaultyHardened::new(Arc::new(session_bound)));
        let factory = Arc::new(CountingFactory::new(hardened.clone()));

        let mode = ModeFlag::new(mode == AuthMode::Secure);
        let orchestrator = AuthOrchestrator::new(
            Arc::new(store.clone()),
            hasher,
            tokens.clone(),
            Arc::new(audit.clone()),
            factory.clone(),
            mode.clone(),
            OrchestratorSettings::default(),
        );

        Self {
            orchestrator,
            store,
            cache,
            audit,
            mode,
            tokens,
            hardened,
            factory,
        }
    }

    pub fn legacy() -> Self {
        Self::new(AuthMode::Legacy)
    }

    pub fn secure() -> Self {
        Self::new(AuthMode::Secure)
    }

    /// Register an identity. Runs in whatever mode the harness is in.
    pub async fn register(&self, email: &str, role: &str) -> Identity {
        self.orchestrator
            .create_user(
                email,
                PASSWORD,
                Some(role),
                IdentityAttributes::default(),
                &ctx(),
            )
            .await
            .expect("registration should succeed")
    }
}
