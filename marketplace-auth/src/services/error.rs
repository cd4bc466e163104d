//! Caller-facing error contract of the orchestrator.
//!
//! Only security rejections and write-path integrity failures reach callers
//! as distinct conditions; every other failure collapses into the generic
//! outcome of the operation.

use service_core::error::AppError;
use thiserror::Error;

use super::hardened::SecurityRejection;
use super::hashing::HashError;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Security(SecurityRejection),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Failed to create session")]
    SessionCreationFailed,

    #[error("An identity with this email already exists")]
    DuplicateIdentity,

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Password hashing failed: {0}")]
    Hashing(#[from] HashError),

    #[error("Failed to persist identity: {0}")]
    Persistence(#[source] StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => AuthError::DuplicateIdentity,
            StoreError::NotFound => AuthError::IdentityNotFound,
            other => AuthError::Persistence(other),
        }
    }
}

impl From<SecurityRejection> for AuthError {
    fn from(rejection: SecurityRejection) -> Self {
        AuthError::Security(rejection)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Security(rejection) => {
                let retry_after = rejection.retry_after();
                match rejection {
                    SecurityRejection::AccountLocked { .. } => {
                        AppError::Locked(rejection.to_string(), retry_after)
                    }
                    SecurityRejection::TooManyAttempts { .. } => {
                        AppError::TooManyRequests(rejection.to_string(), retry_after)
                    }
                    SecurityRejection::TokenExpired | SecurityRejection::SessionRevoked => {
                        AppError::Unauthorized(anyhow::anyhow!(rejection.to_string()))
                    }
                }
            }
            AuthError::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            AuthError::SessionCreationFailed => {
                AppError::InternalError(anyhow::anyhow!("Session creation failed"))
            }
            AuthError::DuplicateIdentity => {
                AppError::Conflict(anyhow::anyhow!("An identity with this email already exists"))
            }
            AuthError::IdentityNotFound => AppError::NotFound(anyhow::anyhow!("Identity not found")),
            AuthError::Hashing(e) => AppError::InternalError(anyhow::anyhow!(e)),
            AuthError::Persistence(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
        }
    }
}
