//! Request handlers.

pub mod health;
pub mod tokens;
pub mod users;

use crate::error::AppError;

/// Fallback for unmatched routes.
pub async fn not_found() -> AppError {
    AppError::NotFound
}
