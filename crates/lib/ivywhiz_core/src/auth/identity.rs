//! Request identity and the requirement ladder built on it.

use super::AuthError;
use super::permissions::PermissionRegistry;
use crate::models::auth::User;

/// Who is making the current request. Bound once by the authenticate gate.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(User),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(user) => Some(user),
        }
    }

    pub fn require_authenticated(&self) -> Result<&User, AuthError> {
        self.user().ok_or(AuthError::AuthenticationRequired)
    }

    /// Authenticated and activated.
    pub fn require_activated(&self) -> Result<&User, AuthError> {
        let user = self.require_authenticated()?;
        if !user.activated {
            return Err(AuthError::InactiveAccount);
        }
        Ok(user)
    }

    /// Activated and holding `code`. Grants are read fresh from `registry`.
    pub async fn require_permission(
        &self,
        registry: &PermissionRegistry,
        code: &str,
    ) -> Result<&User, AuthError> {
        let user = self.require_activated()?;
        if !registry.user_has(user.id, code).await? {
            return Err(AuthError::PermissionDenied);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::auth::password::Credential;
    use crate::auth::permissions::{ADMIN_ACCESS, TUTOR_ACCESS};
    use crate::models::auth::Role;
    use crate::store::{MemoryStore, PermissionStore};

    fn user(id: i64, activated: bool) -> User {
        User {
            id,
            email: format!("u{id}@example.com"),
            password: Credential::default(),
            first_name: "Test".into(),
            last_name: "User".into(),
            username: format!("u{id}"),
            role: Role::Tutor,
            activated,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn registry() -> (Arc<MemoryStore>, PermissionRegistry) {
        let store = Arc::new(MemoryStore::new());
        (
            store.clone(),
            PermissionRegistry::new(store, Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn anonymous_fails_every_rung_as_unauthenticated() {
        let (_, registry) = registry();
        let anon = Identity::Anonymous;
        assert!(matches!(
            anon.require_authenticated(),
            Err(AuthError::AuthenticationRequired)
        ));
        assert!(matches!(
            anon.require_activated(),
            Err(AuthError::AuthenticationRequired)
        ));
        assert!(matches!(
            anon.require_permission(&registry, TUTOR_ACCESS).await,
            Err(AuthError::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn inactive_user_stops_at_activation() {
        let (store, registry) = registry();
        store.add_for_user(1, &[TUTOR_ACCESS]).await.unwrap();
        let who = Identity::Authenticated(user(1, false));

        assert!(who.require_authenticated().is_ok());
        assert!(matches!(
            who.require_activated(),
            Err(AuthError::InactiveAccount)
        ));
        assert!(matches!(
            who.require_permission(&registry, TUTOR_ACCESS).await,
            Err(AuthError::InactiveAccount)
        ));
    }

    #[tokio::test]
    async fn active_user_needs_the_exact_code() {
        let (store, registry) = registry();
        store.add_for_user(2, &[TUTOR_ACCESS]).await.unwrap();
        let who = Identity::Authenticated(user(2, true));

        assert!(who.require_activated().is_ok());
        assert!(who.require_permission(&registry, TUTOR_ACCESS).await.is_ok());
        assert!(matches!(
            who.require_permission(&registry, ADMIN_ACCESS).await,
            Err(AuthError::PermissionDenied)
        ));
    }
}
