//! Database migration support.
//!
//! Embeds and runs SQL migrations from `ivywhiz_core/migrations/`: users,
//! scoped tokens and the permission catalogue.

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
