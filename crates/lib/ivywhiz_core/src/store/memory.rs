//! In-process store for tests and database-less runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{PermissionStore, Result, StoreError, TokenStore, UserStore};
use crate::auth::permissions::{ALL_CODES, Permissions};
use crate::models::auth::{NewUser, TokenRecord, TokenScope, User};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
    tokens: HashMap<String, TokenRecord>,
    grants: HashMap<i64, BTreeSet<String>>,
}

/// Mirrors the Postgres semantics: unique emails, version-checked updates,
/// catalogue-only permission codes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    token_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`UserStore::get_for_token`] has been called.
    pub fn token_lookups(&self) -> usize {
        self.token_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, new: NewUser) -> Result<User> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: inner.next_id,
            email: new.email,
            password: new.password,
            first_name: new.first_name,
            last_name: new.last_name,
            username: new.username,
            role: new.role,
            activated: new.activated,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        self.token_lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        let Some(record) = inner.tokens.get(token_hash) else {
            return Ok(None);
        };
        if record.scope != scope || record.expiry <= now {
            return Ok(None);
        }
        Ok(inner.users.get(&record.user_id).cloned())
    }

    async fn update(&self, user: &mut User) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let stored = inner
            .users
            .get_mut(&user.id)
            .filter(|stored| stored.version == user.version)
            .ok_or(StoreError::EditConflict)?;

        let mut next = user.clone();
        next.password.forget_plaintext();
        next.version += 1;
        next.updated_at = Utc::now();
        next.created_at = stored.created_at;
        *stored = next;

        user.version = stored.version;
        user.updated_at = stored.updated_at;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: &TokenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(token.hash.clone(), token.clone());
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.tokens.len();
        inner
            .tokens
            .retain(|_, t| !(t.scope == scope && t.user_id == user_id));
        Ok((before - inner.tokens.len()) as u64)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn all_for_user(&self, user_id: i64) -> Result<Permissions> {
        let inner = self.inner.lock().await;
        Ok(inner
            .grants
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let held = inner.grants.entry(user_id).or_default();
        for code in codes.iter().filter(|c| ALL_CODES.contains(*c)) {
            held.insert((*code).to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Credential;
    use crate::models::auth::Role;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: Credential::from_hash("$2b$04$placeholder"),
            first_name: "Mary".into(),
            last_name: "Jackson".into(),
            username: "mary".into(),
            role: Role::Student,
            activated: false,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        store.insert(new_user("m@example.com")).await.unwrap();
        let err = store.insert(new_user("m@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn stale_version_is_an_edit_conflict() {
        let store = MemoryStore::new();
        let mut first = store.insert(new_user("m@example.com")).await.unwrap();
        let mut second = first.clone();

        first.activated = true;
        store.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.first_name = "Marie".into();
        let err = store.update(&mut second).await.unwrap_err();
        assert!(matches!(err, StoreError::EditConflict));

        let stored = store.get_by_id(first.id).await.unwrap().unwrap();
        assert!(stored.activated);
        assert_eq!(stored.first_name, "Mary");
    }

    #[tokio::test]
    async fn token_lookups_are_counted() {
        let store = MemoryStore::new();
        assert_eq!(store.token_lookups(), 0);
        let found = store
            .get_for_token(TokenScope::Authentication, "nope", Utc::now())
            .await
            .unwrap();
        assert!(found.is_none());
        assert_eq!(store.token_lookups(), 1);
    }
}
