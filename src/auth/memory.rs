//! In-memory gateway implementation for tests and examples.
//!
//! Enforces the same uniqueness rules as the durable store so the pipeline
//! can be exercised end-to-end without PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{AuthError, Result};

use super::gateway::{hash_credential, UserGateway};
use super::user::{User, UserProfile, UserRecord};

#[derive(Default)]
struct Inner {
    rows: Vec<UserRecord>,
    next_id: i64,
}

/// Thread-safe in-memory user store.
#[derive(Clone, Default)]
pub struct MemoryUserGateway {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryUserGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, for assertions.
    pub fn records(&self) -> Vec<UserRecord> {
        self.inner.read().rows.clone()
    }
}

#[async_trait]
impl UserGateway for MemoryUserGateway {
    async fn register(&self, mut user: User) -> Result<UserProfile> {
        user.uuid = Uuid::new_v4();
        user.credential = hash_credential(&user.credential)?;

        // Check-and-insert under one write lock: all or nothing, exactly one
        // winner per username regardless of interleaving.
        let mut inner = self.inner.write();

        if inner.rows.iter().any(|row| row.username == user.username) {
            return Err(AuthError::duplicate_username(&user.username));
        }
        if inner.rows.iter().any(|row| row.version == user.version) {
            return Err(AuthError::internal(format!(
                "version {} already recorded",
                user.version
            )));
        }

        inner.next_id += 1;
        user.id = Some(inner.next_id);
        inner.rows.push(user.to_record());

        Ok(user.to_profile())
    }

    async fn max_version(&self) -> Result<i64> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .iter()
            .map(|row| row.version)
            .filter(|version| *version > 0)
            .max()
            .unwrap_or(1))
    }
}
