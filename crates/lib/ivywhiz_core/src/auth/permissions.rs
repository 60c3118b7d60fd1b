//! Permission registry: which capability codes a user holds.
//!
//! Grants are fetched fresh from the store on every check, so a change takes
//! effect on the very next request. Nothing here caches across requests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::AuthError;
use crate::models::auth::Role;
use crate::store::{PermissionStore, bounded};

pub const ADMIN_ACCESS: &str = "admin:access";
pub const TUTOR_ACCESS: &str = "tutor:access";
pub const STUDENT_ACCESS: &str = "student:access";

/// Every code the permission catalogue knows about.
pub const ALL_CODES: [&str; 3] = [ADMIN_ACCESS, TUTOR_ACCESS, STUDENT_ACCESS];

impl Role {
    /// Code granted to a freshly created account of this role.
    pub fn permission_code(&self) -> &'static str {
        match self {
            Role::Admin => ADMIN_ACCESS,
            Role::Tutor => TUTOR_ACCESS,
            Role::Student => STUDENT_ACCESS,
        }
    }
}

/// A user's set of permission codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Store-backed permission lookups with a bounded round-trip.
#[derive(Clone)]
pub struct PermissionRegistry {
    store: Arc<dyn PermissionStore>,
    timeout: Duration,
}

impl PermissionRegistry {
    pub fn new(store: Arc<dyn PermissionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Current codes for `user_id`; empty when nothing was granted.
    pub async fn all_for_user(&self, user_id: i64) -> Result<Permissions, AuthError> {
        Ok(bounded(self.timeout, self.store.all_for_user(user_id)).await?)
    }

    /// Idempotent grant.
    pub async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), AuthError> {
        bounded(self.timeout, self.store.add_for_user(user_id, codes)).await?;
        debug!(user_id, ?codes, "granted permissions");
        Ok(())
    }

    /// Fetch and test in one step.
    pub async fn user_has(&self, user_id: i64, code: &str) -> Result<bool, AuthError> {
        Ok(self.all_for_user(user_id).await?.include(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, PermissionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = PermissionRegistry::new(store.clone(), Duration::from_secs(1));
        (store, registry)
    }

    #[test]
    fn include_is_plain_membership() {
        let perms: Permissions = ["tutor:access"].into_iter().collect();
        assert!(perms.include("tutor:access"));
        assert!(!perms.include("admin:access"));
        assert!(!perms.include("tutor"));
    }

    #[test]
    fn roles_map_to_their_access_code() {
        assert_eq!(Role::Admin.permission_code(), "admin:access");
        assert_eq!(Role::Tutor.permission_code(), "tutor:access");
        assert_eq!(Role::Student.permission_code(), "student:access");
    }

    #[tokio::test]
    async fn user_without_grants_has_empty_set() {
        let (_, registry) = registry();
        let perms = registry.all_for_user(99).await.unwrap();
        assert_eq!(perms, Permissions::default());
    }

    #[tokio::test]
    async fn grants_are_idempotent() {
        let (_, registry) = registry();
        registry.add_for_user(1, &[TUTOR_ACCESS]).await.unwrap();
        registry.add_for_user(1, &[TUTOR_ACCESS]).await.unwrap();

        let perms = registry.all_for_user(1).await.unwrap();
        assert_eq!(perms, [TUTOR_ACCESS].into_iter().collect());
        assert!(registry.user_has(1, TUTOR_ACCESS).await.unwrap());
        assert!(!registry.user_has(1, ADMIN_ACCESS).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_codes_are_ignored() {
        let (_, registry) = registry();
        registry
            .add_for_user(1, &["root:everything", STUDENT_ACCESS])
            .await
            .unwrap();
        let perms = registry.all_for_user(1).await.unwrap();
        assert_eq!(perms, [STUDENT_ACCESS].into_iter().collect());
    }

    #[tokio::test]
    async fn grants_are_visible_on_the_next_lookup() {
        let (store, registry) = registry();
        assert!(!registry.user_has(5, ADMIN_ACCESS).await.unwrap());
        PermissionStore::add_for_user(store.as_ref(), 5, &[ADMIN_ACCESS])
            .await
            .unwrap();
        assert!(registry.user_has(5, ADMIN_ACCESS).await.unwrap());
    }
}
