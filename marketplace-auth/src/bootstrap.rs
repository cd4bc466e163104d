//! Process wiring: builds the orchestrator and its collaborators from config.

use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::services::{
    AuditSink, AuthMode, AuthOrchestrator, BruteForcePolicy, CacheSource, CredentialHasher,
    IdentityStore, ModeFlag, OrchestratorSettings, PgIdentityStore, SessionBoundFactory,
    TokenService, TracingAuditSink,
};

/// Everything a running process holds on to.
pub struct AuthRuntime {
    orchestrator: Arc<AuthOrchestrator>,
    mode: ModeFlag,
}

impl AuthRuntime {
    /// Production wiring: Postgres store, Redis-backed hardened path, audit
    /// events to the tracing pipeline.
    pub async fn from_config(config: &AuthConfig) -> Result<Self, AppError> {
        let store = PgIdentityStore::connect_lazy(&config.database)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        store
            .run_migrations()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Self::assemble(
            config,
            Arc::new(store),
            CacheSource::Redis {
                url: config.redis.url.clone(),
                connect_timeout: config.redis.connect_timeout(),
            },
            Arc::new(TracingAuditSink),
        )
    }

    /// Wire the runtime around caller-supplied infrastructure.
    pub fn assemble(
        config: &AuthConfig,
        store: Arc<dyn IdentityStore>,
        cache: CacheSource,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AppError> {
        let hasher = CredentialHasher::new(config.environment, &config.hashing)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        let tokens = TokenService::new(&config.jwt);

        let factory = SessionBoundFactory::new(
            cache,
            store.clone(),
            hasher.clone(),
            tokens.clone(),
            audit.clone(),
            BruteForcePolicy::from(&config.brute_force),
        );

        let mode = ModeFlag::new(config.mode.secure_mode_enabled);
        let orchestrator = AuthOrchestrator::new(
            store,
            hasher,
            tokens,
            audit,
            Arc::new(factory),
            mode.clone(),
            OrchestratorSettings::from(config),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            mode,
        })
    }

    pub fn orchestrator(&self) -> Arc<AuthOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn mode_flag(&self) -> &ModeFlag {
        &self.mode
    }

    /// Re-read the secure-mode setting and apply it to the next calls.
    pub fn reload_mode(&self) -> Result<AuthMode, AppError> {
        let mode = if AuthConfig::reload_secure_mode()? {
            AuthMode::Secure
        } else {
            AuthMode::Legacy
        };
        self.mode.set(mode);
        Ok(mode)
    }

    pub async fn shutdown(&self, grace: Duration) {
        self.orchestrator.shutdown(grace).await;
    }
}
