//! Credential hashing on a dedicated, bounded worker pool.
//!
//! Argon2id is CPU-bound, so every hash and verification runs on a private
//! runtime owned by the [`CredentialHasher`] instead of the request-handling
//! runtime. A semaphore bounds queued plus running jobs; callers bound the
//! total wait with a timeout.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

use crate::config::{Environment, HashingConfig};
use crate::models::PasswordDigest;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Credential hashing pool is shut down")]
    PoolClosed,

    #[error("Credential hashing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Hashing worker failed: {0}")]
    Worker(String),

    #[error("Invalid hashing parameters: {0}")]
    Params(String),

    #[error("Failed to start hashing pool: {0}")]
    Startup(#[from] std::io::Error),
}

/// Argon2 cost parameters, fixed per deployment tier at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkFactor {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl WorkFactor {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Test => Self {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            Environment::Dev => Self {
                memory_kib: 4096,
                iterations: 1,
                parallelism: 1,
            },
            Environment::Prod => Self {
                memory_kib: Params::DEFAULT_M_COST,
                iterations: Params::DEFAULT_T_COST,
                parallelism: Params::DEFAULT_P_COST,
            },
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

struct HashingPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl HashingPool {
    fn start(workers: usize, queue_depth: usize) -> Result<Self, HashError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers.max(1))
            .thread_name("credential-hasher")
            .build()?;

        tracing::info!(workers, queue_depth, "Credential hashing pool started");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(queue_depth.max(1))),
            closed: AtomicBool::new(false),
        })
    }

    fn take_runtime(&self) -> Option<Runtime> {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for HashingPool {
    fn drop(&mut self) {
        if let Some(runtime) = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tracing::warn!("Credential hashing pool dropped without shutdown, detaching workers");
            runtime.shutdown_background();
        }
    }
}

/// Computes and verifies password digests off the caller's scheduler.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct CredentialHasher {
    pool: Arc<HashingPool>,
    argon2: Argon2<'static>,
    default_timeout: Duration,
}

impl CredentialHasher {
    pub fn new(environment: Environment, config: &HashingConfig) -> Result<Self, HashError> {
        Self::with_work_factor(
            WorkFactor::for_environment(environment),
            config.workers,
            config.queue_depth,
            config.timeout(),
        )
    }

    pub fn with_work_factor(
        work_factor: WorkFactor,
        workers: usize,
        queue_depth: usize,
        default_timeout: Duration,
    ) -> Result<Self, HashError> {
        let argon2 = work_factor.argon2()?;
        let pool = HashingPool::start(workers, queue_depth)?;

        Ok(Self {
            pool: Arc::new(pool),
            argon2,
            default_timeout,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.pool.closed.load(Ordering::Acquire)
    }

    pub async fn hash(&self, plaintext: &str) -> Result<PasswordDigest, HashError> {
        self.hash_within(plaintext, self.default_timeout).await
    }

    /// Hash a password with a fresh random salt.
    pub async fn hash_within(
        &self,
        plaintext: &str,
        timeout: Duration,
    ) -> Result<PasswordDigest, HashError> {
        let argon2 = self.argon2.clone();
        let plaintext = plaintext.to_string();

        let digest = self
            .run(timeout, move || {
                let salt = SaltString::generate(&mut OsRng);
                argon2
                    .hash_password(plaintext.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| HashError::Hash(e.to_string()))
            })
            .await??;

        Ok(PasswordDigest::new(digest))
    }

    pub async fn verify(&self, plaintext: &str, digest: &PasswordDigest) -> bool {
        self.verify_within(plaintext, digest, self.default_timeout)
            .await
    }

    /// Verify a password against a stored digest.
    ///
    /// Malformed digests, timeouts and pool failures all count as a mismatch.
    pub async fn verify_within(
        &self,
        plaintext: &str,
        digest: &PasswordDigest,
        timeout: Duration,
    ) -> bool {
        if PasswordHash::new(digest.as_str()).is_err() {
            tracing::warn!("Stored password digest is malformed");
            return false;
        }

        let argon2 = self.argon2.clone();
        let plaintext = plaintext.to_string();
        let digest = digest.as_str().to_string();

        let outcome = self
            .run(timeout, move || {
                PasswordHash::new(&digest)
                    .map(|parsed| argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok())
                    .unwrap_or(false)
            })
            .await;

        match outcome {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "Password verification did not complete");
                false
            }
        }
    }

    /// Run a CPU-bound job on the hashing pool.
    ///
    /// The permit travels with the job, so a timed-out caller does not free a
    /// slot that is still busy.
    pub(crate) async fn run<T, F>(&self, timeout: Duration, job: F) -> Result<T, HashError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(HashError::PoolClosed);
        }

        let permits = self.pool.permits.clone();
        let handle = self.pool.handle.clone();

        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| HashError::PoolClosed)?;

            handle
                .spawn_blocking(move || {
                    let _permit = permit;
                    job()
                })
                .await
                .map_err(|e| {
                    if e.is_cancelled() {
                        HashError::PoolClosed
                    } else {
                        HashError::Worker(e.to_string())
                    }
                })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| HashError::Timeout(timeout))?
    }

    /// Stop accepting work and wait up to `grace` for running jobs.
    pub async fn shutdown(&self, grace: Duration) {
        if self.pool.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.permits.close();

        if let Some(runtime) = self.pool.take_runtime() {
            let joined =
                tokio::task::spawn_blocking(move || runtime.shutdown_timeout(grace)).await;
            if let Err(e) = joined {
                tracing::error!(error = %e, "Credential hashing pool shutdown failed");
            }
        }

        tracing::info!("Credential hashing pool shut down");
    }
}
