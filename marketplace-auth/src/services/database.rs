//! PostgreSQL identity store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::store::{IdentityStore, IdentityTransaction, StoreError};
use crate::config::DatabaseConfig;
use crate::models::{IdentityId, IdentityRecord, PasswordDigest};

const SELECT_IDENTITY: &str = r#"
    SELECT id, email, password_digest, role, is_active, email_verified, phone_verified,
           display_name, created_utc, updated_utc
    FROM identities
"#;

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: String,
    email: String,
    password_digest: String,
    role: Option<String>,
    is_active: bool,
    email_verified: bool,
    phone_verified: bool,
    display_name: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<IdentityRow> for IdentityRecord {
    fn from(row: IdentityRow) -> Self {
        Self {
            id: IdentityId::parse(&row.id),
            email: row.email,
            password_digest: PasswordDigest::new(row.password_digest),
            role: row.role,
            is_active: row.is_active,
            email_verified: row.email_verified,
            phone_verified: row.phone_verified,
            display_name: row.display_name,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

/// PostgreSQL-backed identity store.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that connects on first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.url)?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {}", e)))?;
        tracing::info!("Identity store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!("{} WHERE email = $1", SELECT_IDENTITY))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(IdentityRecord::from))
    }

    async fn find_by_id(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!("{} WHERE id = $1", SELECT_IDENTITY))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(IdentityRecord::from))
    }

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgIdentityTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::Database(e)
            })?;
        Ok(())
    }
}

struct PgIdentityTransaction {
    tx: Transaction<'static, Postgres>,
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl IdentityTransaction for PgIdentityTransaction {
    async fn insert(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO identities (id, email, password_digest, role, is_active, email_verified,
                                    phone_verified, display_name, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.email)
        .bind(record.password_digest.as_str())
        .bind(&record.role)
        .bind(record.is_active)
        .bind(record.email_verified)
        .bind(record.phone_verified)
        .bind(&record.display_name)
        .bind(record.created_utc)
        .bind(record.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET password_digest = $2, role = $3, is_active = $4, email_verified = $5,
                phone_verified = $6, display_name = $7, updated_utc = $8
            WHERE id = $1
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.password_digest.as_str())
        .bind(&record.role)
        .bind(record.is_active)
        .bind(record.email_verified)
        .bind(record.phone_verified)
        .bind(&record.display_name)
        .bind(record.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_write_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
