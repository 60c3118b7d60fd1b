//! Authentication and authorization logic.
//!
//! Provides password credentials, scoped bearer tokens, the permission
//! registry and the request identity that `ivywhiz_api` builds its
//! middleware chain on.

pub mod identity;
pub mod password;
pub mod permissions;
pub mod tokens;

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
///
/// Every policy failure has its own variant so callers (and tests) can match
/// on the kind instead of on message text.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed header, bad length, unknown or expired token.
    #[error("invalid or missing authentication token")]
    InvalidToken,

    /// No live token with that hash exists in the requested scope.
    #[error("token not found")]
    TokenNotFound,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("account is not activated")]
    InactiveAccount,

    #[error("permission denied")]
    PermissionDenied,

    #[error("Invalid credentials")]
    CredentialMismatch,

    #[error("edit conflict")]
    EditConflict,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EditConflict => AuthError::EditConflict,
            other => AuthError::Store(other),
        }
    }
}

/// Tunables for the auth core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
    /// Random bytes per token before base32 encoding.
    pub token_entropy_bytes: usize,
    /// Upper bound on any single store round-trip.
    pub store_timeout: Duration,
    pub activation_ttl: chrono::Duration,
    pub password_reset_ttl: chrono::Duration,
    pub authentication_ttl: chrono::Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: password::DEFAULT_BCRYPT_COST,
            token_entropy_bytes: tokens::DEFAULT_ENTROPY_BYTES,
            store_timeout: Duration::from_secs(3),
            activation_ttl: chrono::Duration::hours(72),
            password_reset_ttl: chrono::Duration::minutes(45),
            authentication_ttl: chrono::Duration::hours(24),
        }
    }
}
