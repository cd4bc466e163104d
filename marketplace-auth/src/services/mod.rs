//! Services layer for marketplace-auth.
//!
//! Credential hashing, tokens, the two authentication paths and the
//! orchestrator that selects between them.

pub mod audit;
mod database;
pub mod error;
pub mod hardened;
pub mod hashing;
mod legacy;
pub mod mode;
mod orchestrator;
pub mod session_bound;
pub mod session_cache;
pub mod store;
pub mod tokens;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use database::PgIdentityStore;
pub use error::AuthError;
pub use hardened::{
    HardenedAuthenticator, HardenedError, HardenedFactory, HardenedSession, SecurityRejection,
    StaticHardenedFactory,
};
pub use hashing::{CredentialHasher, HashError, WorkFactor};
pub use legacy::LegacyAuthenticator;
pub use mode::{AuthMode, ModeFlag};
pub use orchestrator::{AuthContext, AuthOrchestrator, HealthReport, OrchestratorSettings};
pub use session_bound::{BruteForcePolicy, CacheSource, SessionBoundAuthenticator, SessionBoundFactory};
pub use session_cache::{MemorySessionCache, RedisSessionCache, SessionCache};
pub use store::{IdentityStore, IdentityTransaction, MemoryIdentityStore, StoreError};
pub use tokens::{SessionTokens, TokenClaims, TokenError, TokenKind, TokenService};
