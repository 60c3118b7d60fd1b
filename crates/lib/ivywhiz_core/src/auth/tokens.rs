//! Scoped bearer tokens.
//!
//! A token is a run of random bytes rendered as unpadded base32. Only the
//! SHA-256 digest of that string is stored; the plaintext leaves the process
//! once, in the response or mail that carries it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use data_encoding::BASE32_NOPAD;
use rand::{RngCore, rng};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::AuthError;
use crate::models::auth::{Token, TokenScope, User};
use crate::store::{TokenStore, UserStore, bounded};
use crate::validation::Validator;

/// Random bytes per token when nothing else is configured.
pub const DEFAULT_ENTROPY_BYTES: usize = 16;

/// Build a token for `user_id` that expires `ttl` from now. Nothing is stored.
pub fn generate_token(user_id: i64, ttl: chrono::Duration, scope: TokenScope, entropy: usize) -> Token {
    let mut bytes = vec![0u8; entropy];
    rng().fill_bytes(&mut bytes);
    let plaintext = BASE32_NOPAD.encode(&bytes);
    let hash = hash_token(&plaintext);

    Token {
        plaintext,
        hash,
        user_id,
        expiry: Utc::now() + ttl,
        scope,
    }
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Length of the base32 text for `bytes` random bytes, without padding.
pub fn encoded_len(bytes: usize) -> usize {
    (bytes * 8).div_ceil(5)
}

/// Issues, resolves and invalidates tokens against the stores.
#[derive(Clone)]
pub struct TokenEngine {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
    entropy_bytes: usize,
    timeout: Duration,
}

impl TokenEngine {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserStore>,
        entropy_bytes: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            users,
            entropy_bytes,
            timeout,
        }
    }

    /// Expected plaintext length for this engine's entropy.
    pub fn plaintext_len(&self) -> usize {
        encoded_len(self.entropy_bytes)
    }

    /// Create a token and persist its hash.
    pub async fn issue(
        &self,
        user_id: i64,
        ttl: chrono::Duration,
        scope: TokenScope,
    ) -> Result<Token, AuthError> {
        let token = generate_token(user_id, ttl, scope, self.entropy_bytes);
        bounded(self.timeout, self.tokens.insert_token(&token.record())).await?;
        debug!(user_id, %scope, expiry = %token.expiry, "issued token");
        Ok(token)
    }

    /// Shape check only. Never touches the store.
    pub fn validate_plaintext(&self, plaintext: &str, v: &mut Validator) {
        v.check(!plaintext.is_empty(), "token", "must be provided");
        v.check(
            plaintext.len() == self.plaintext_len(),
            "token",
            format!("must be {} bytes long", self.plaintext_len()),
        );
    }

    /// Owner of a live token in `scope`.
    ///
    /// Unknown, expired and wrong-scope tokens all give
    /// [`AuthError::TokenNotFound`].
    pub async fn resolve(&self, scope: TokenScope, plaintext: &str) -> Result<User, AuthError> {
        let hash = hash_token(plaintext);
        bounded(
            self.timeout,
            self.users.get_for_token(scope, &hash, Utc::now()),
        )
        .await?
        .ok_or(AuthError::TokenNotFound)
    }

    /// Drop every token of `scope` held by `user_id`.
    pub async fn delete_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<u64, AuthError> {
        let removed = bounded(self.timeout, self.tokens.delete_all_for_user(scope, user_id)).await?;
        debug!(user_id, %scope, removed, "deleted tokens");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Credential;
    use crate::models::auth::{NewUser, Role};
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, TokenEngine, User) {
        let store = Arc::new(MemoryStore::new());
        let engine = TokenEngine::new(
            store.clone(),
            store.clone(),
            DEFAULT_ENTROPY_BYTES,
            Duration::from_secs(1),
        );
        let user = UserStore::insert(
            store.as_ref(),
            NewUser {
                email: "alan@example.com".into(),
                password: Credential::from_hash("$2b$04$unused"),
                first_name: "Alan".into(),
                last_name: "Turing".into(),
                username: "alan".into(),
                role: Role::Student,
                activated: true,
            },
        )
        .await
        .unwrap();
        (store, engine, user)
    }

    #[test]
    fn plaintext_is_26_base32_chars_of_16_bytes() {
        let token = generate_token(1, chrono::Duration::hours(1), TokenScope::Activation, 16);
        assert_eq!(token.plaintext.len(), 26);
        let decoded = BASE32_NOPAD.decode(token.plaintext.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_eq!(token.hash, hash_token(&token.plaintext));
        assert_eq!(token.hash.len(), 64);
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = generate_token(1, chrono::Duration::hours(1), TokenScope::Activation, 16);
        let b = generate_token(1, chrono::Duration::hours(1), TokenScope::Activation, 16);
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn encoded_len_rounds_up() {
        assert_eq!(encoded_len(16), 26);
        assert_eq!(encoded_len(32), 52);
        assert_eq!(encoded_len(5), 8);
    }

    #[tokio::test]
    async fn validate_plaintext_checks_presence_then_length() {
        let (_, engine, _) = setup().await;

        let mut v = Validator::new();
        engine.validate_plaintext("", &mut v);
        assert_eq!(v.errors()["token"], "must be provided");

        let mut v = Validator::new();
        engine.validate_plaintext("short", &mut v);
        assert_eq!(v.errors()["token"], "must be 26 bytes long");

        let mut v = Validator::new();
        engine.validate_plaintext(&"A".repeat(26), &mut v);
        assert!(v.is_valid());
    }

    #[tokio::test]
    async fn issued_token_resolves_to_its_owner() {
        let (_, engine, user) = setup().await;
        let token = engine
            .issue(user.id, chrono::Duration::hours(24), TokenScope::Authentication)
            .await
            .unwrap();
        let owner = engine
            .resolve(TokenScope::Authentication, &token.plaintext)
            .await
            .unwrap();
        assert_eq!(owner.id, user.id);
    }

    #[tokio::test]
    async fn wrong_scope_is_not_found() {
        let (_, engine, user) = setup().await;
        let token = engine
            .issue(user.id, chrono::Duration::hours(72), TokenScope::Activation)
            .await
            .unwrap();
        let err = engine
            .resolve(TokenScope::Authentication, &token.plaintext)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenNotFound));
    }

    #[tokio::test]
    async fn expired_token_is_not_found() {
        let (_, engine, user) = setup().await;
        let token = engine
            .issue(user.id, chrono::Duration::seconds(-1), TokenScope::Authentication)
            .await
            .unwrap();
        let err = engine
            .resolve(TokenScope::Authentication, &token.plaintext)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenNotFound));
    }

    #[tokio::test]
    async fn delete_all_only_touches_one_scope() {
        let (_, engine, user) = setup().await;
        let auth_a = engine
            .issue(user.id, chrono::Duration::hours(1), TokenScope::Authentication)
            .await
            .unwrap();
        let auth_b = engine
            .issue(user.id, chrono::Duration::hours(1), TokenScope::Authentication)
            .await
            .unwrap();
        let activation = engine
            .issue(user.id, chrono::Duration::hours(1), TokenScope::Activation)
            .await
            .unwrap();

        let removed = engine
            .delete_all_for_user(TokenScope::Authentication, user.id)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        for t in [&auth_a, &auth_b] {
            assert!(engine
                .resolve(TokenScope::Authentication, &t.plaintext)
                .await
                .is_err());
        }
        assert!(engine
            .resolve(TokenScope::Activation, &activation.plaintext)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn deleting_nothing_is_not_an_error() {
        let (_, engine, user) = setup().await;
        let removed = engine
            .delete_all_for_user(TokenScope::PasswordReset, user.id)
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
