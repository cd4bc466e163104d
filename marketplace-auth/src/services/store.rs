//! Identity store contract and an in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{IdentityId, IdentityRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Identity already exists")]
    Duplicate,

    #[error("Identity not found")]
    NotFound,

    #[error("Identity store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent identity store.
///
/// Email lookups are exact-string matches.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError>;
    async fn find_by_id(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, StoreError>;
    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError>;
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Unit of work on the identity store. Dropping without commit discards it.
#[async_trait]
pub trait IdentityTransaction: Send {
    async fn insert(&mut self, record: &IdentityRecord) -> Result<(), StoreError>;
    async fn update(&mut self, record: &IdentityRecord) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Faults {
    lookups: AtomicBool,
    inserts: AtomicBool,
    commits: AtomicBool,
}

/// Identity store kept in process memory, with switchable faults.
#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    records: Arc<Mutex<HashMap<String, IdentityRecord>>>,
    faults: Arc<Faults>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.faults.lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.faults.inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.faults.commits.store(fail, Ordering::SeqCst);
    }

    /// Seed a record directly, bypassing registration.
    pub fn seed(&self, record: IdentityRecord) -> Result<(), StoreError> {
        self.lock()?.insert(record.id.to_string(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, IdentityRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Memory store mutex poisoned: {}", e)))
    }

    fn check_lookup_fault(&self) -> Result<(), StoreError> {
        if self.faults.lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected lookup failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.check_lookup_fault()?;
        Ok(self.lock()?.values().find(|r| r.email == email).cloned())
    }

    async fn find_by_id(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, StoreError> {
        self.check_lookup_fault()?;
        Ok(self.lock()?.get(&id.to_string()).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_lookup_fault()
    }
}

enum PendingWrite {
    Insert(IdentityRecord),
    Update(IdentityRecord),
}

struct MemoryTransaction {
    store: MemoryIdentityStore,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl IdentityTransaction for MemoryTransaction {
    async fn insert(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        if self.store.faults.inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }
        self.pending.push(PendingWrite::Insert(record.clone()));
        Ok(())
    }

    async fn update(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        if !self.store.lock()?.contains_key(&record.id.to_string()) {
            return Err(StoreError::NotFound);
        }
        self.pending.push(PendingWrite::Update(record.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, pending } = *self;
        if store.faults.commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut records = store.lock()?;

        // Validate everything first so a failed commit applies nothing.
        for write in &pending {
            if let PendingWrite::Insert(record) = write {
                let taken = records.contains_key(&record.id.to_string())
                    || records.values().any(|r| r.email == record.email);
                if taken {
                    return Err(StoreError::Duplicate);
                }
            }
        }

        for write in pending {
            match write {
                PendingWrite::Insert(record) | PendingWrite::Update(record) => {
                    records.insert(record.id.to_string(), record);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
