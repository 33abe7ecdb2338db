//! Persistence gateway for the user aggregate.
//!
//! The store's two unique indexes (username, version) are the only
//! serialization points in the pipeline; every write is independently keyed
//! and no application-level locking exists. Registration is a single-row
//! insert, so a failed attempt leaves nothing behind.

use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{AuthError, Result};

use super::user::{User, UserProfile, UserRecord};

/// Database interface for registration: one durable write per distinct
/// aggregate version, and the version lookup the resolver round-trips on.
#[async_trait]
pub trait UserGateway: Send + Sync {
    /// Insert the user, assigning fresh identity and hashing the credential.
    ///
    /// A violated username index surfaces as `DuplicateUsername`; any other
    /// store failure as `Internal`. The returned profile carries no
    /// credential.
    async fn register(&self, user: User) -> Result<UserProfile>;

    /// The highest recorded aggregate version, or `1` for an empty store.
    ///
    /// A brand-new aggregate is not a failure; an unreachable store is, and
    /// is reported as `Internal` rather than mistaken for bootstrap.
    async fn max_version(&self) -> Result<i64>;
}

/// Hash a plain credential with the service's fixed-cost parameters.
pub fn hash_credential(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::internal(format!("credential hashing failed: {err}")))
}

/// PostgreSQL-backed gateway.
pub struct PgUserGateway {
    pool: PgPool,
}

impl PgUserGateway {
    /// Connect to the store with the configured pool bounds and timeout.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_millis(config.timeout_ms))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the baseline schema (users table plus both unique indexes).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| AuthError::from(sqlx::Error::Migrate(Box::new(err))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserGateway for PgUserGateway {
    #[instrument(skip(self, user), fields(username = %user.username, version = user.version))]
    async fn register(&self, mut user: User) -> Result<UserProfile> {
        user.uuid = Uuid::new_v4();
        user.credential = hash_credential(&user.credential)?;

        let record = user.to_record();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (uuid, email, first_name, last_name, username, password, role, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(record.uuid)
        .bind(&record.email)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.username)
        .bind(&record.password)
        .bind(&record.role)
        .bind(record.version)
        .fetch_one(&self.pool)
        .await?;

        user.id = Some(id);
        tracing::debug!(user_id = id, "user registered");

        Ok(user.to_profile())
    }

    #[instrument(skip(self))]
    async fn max_version(&self) -> Result<i64> {
        let newest = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, uuid, email, first_name, last_name, username, password, role, version
            FROM users
            WHERE version > $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(0i64)
        .fetch_optional(&self.pool)
        .await?;

        // No row means a brand-new aggregate, which starts at version 1.
        Ok(newest.map(|record| record.version).unwrap_or(1))
    }
}
