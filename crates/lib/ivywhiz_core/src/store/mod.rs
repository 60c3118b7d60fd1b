//! Persistence seams consumed by the auth core.
//!
//! The core never talks to a database directly; it goes through these narrow
//! traits. [`PgStore`] backs them with PostgreSQL, [`MemoryStore`] keeps
//! everything in process for tests and local runs.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::permissions::Permissions;
use crate::models::auth::{NewUser, TokenRecord, TokenScope, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// The row's version moved on since it was read.
    #[error("edit conflict")]
    EditConflict,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// User records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user, returning it with id, version and timestamps set.
    async fn insert(&self, user: NewUser) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Owner of the live token with this hash in this scope.
    ///
    /// Only tokens whose expiry is after `now` match.
    async fn get_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    /// Persist changes to `user` if its version still matches the stored one.
    ///
    /// On success `user.version` and `user.updated_at` are refreshed.
    async fn update(&self, user: &mut User) -> Result<()>;
}

/// Token hashes.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, token: &TokenRecord) -> Result<()>;

    /// Remove every token of `scope` owned by `user_id`, returning how many went.
    async fn delete_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<u64>;
}

/// Permission grants.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn all_for_user(&self, user_id: i64) -> Result<Permissions>;

    /// Grant `codes` to `user_id`. Already-held codes and codes missing from
    /// the permission catalogue are skipped.
    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()>;
}

/// Run a store future, failing with [`StoreError::Timeout`] after `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Duration::from_secs(1), async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn bounded_turns_slow_calls_into_timeouts() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }
}
