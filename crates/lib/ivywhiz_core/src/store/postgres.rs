//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{PermissionStore, Result, StoreError, TokenStore, UserStore};
use crate::auth::password::Credential;
use crate::auth::permissions::Permissions;
use crate::models::auth::{NewUser, Role, TokenRecord, TokenScope, User};

const USER_COLUMNS: &str = "users.id, users.email, users.password, users.first_name, \
     users.last_name, users.username, users.role, users.activated, users.version, \
     users.created_at, users.updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    username: String,
    role: String,
    activated: bool,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(format!("user {}: {e}", row.id)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            password: Credential::from_hash(row.password),
            first_name: row.first_name,
            last_name: row.last_name,
            username: row.username,
            role,
            activated: row.activated,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.constraint() == Some("users_email_key") => {
            StoreError::DuplicateEmail
        }
        _ => StoreError::Db(e),
    }
}

fn password_hash(credential: &Credential) -> Result<&str> {
    credential
        .hash()
        .ok_or_else(|| StoreError::Corrupt("user has no password hash".into()))
}

/// All three store traits over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (email, password, first_name, last_name, username, role, activated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.email)
            .bind(password_hash(&user.password)?)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(user.role.as_str())
            .bind(user.activated)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE users.id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE users.email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             INNER JOIN tokens ON users.id = tokens.user_id \
             WHERE tokens.hash = $1 AND tokens.scope = $2 AND tokens.expiry > $3"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(token_hash)
            .bind(scope.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn update(&self, user: &mut User) -> Result<()> {
        let row = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
            "UPDATE users \
             SET email = $1, password = $2, first_name = $3, last_name = $4, \
                 username = $5, role = $6, activated = $7, \
                 version = version + 1, updated_at = now() \
             WHERE id = $8 AND version = $9 \
             RETURNING version, updated_at",
        )
        .bind(&user.email)
        .bind(password_hash(&user.password)?)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(user.role.as_str())
        .bind(user.activated)
        .bind(user.id)
        .bind(user.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique)?;

        let (version, updated_at) = row.ok_or(StoreError::EditConflict)?;
        user.version = version;
        user.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, token: &TokenRecord) -> Result<()> {
        sqlx::query("INSERT INTO tokens (hash, user_id, expiry, scope) VALUES ($1, $2, $3, $4)")
            .bind(&token.hash)
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
            .bind(scope.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn all_for_user(&self, user_id: i64) -> Result<Permissions> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT permissions.code FROM permissions \
             INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id \
             WHERE users_permissions.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().collect())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        sqlx::query(
            "INSERT INTO users_permissions (user_id, permission_id) \
             SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(codes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
