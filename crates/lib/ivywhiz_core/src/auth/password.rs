//! Password credentials via bcrypt.

use std::fmt;

use super::AuthError;

/// bcrypt cost factor used when none is configured.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// A user's password credential.
///
/// Holds the bcrypt hash and, only while a set/validate cycle is in flight,
/// the plaintext it was derived from. Neither is ever serialized and `Debug`
/// redacts both.
#[derive(Clone, Default)]
pub struct Credential {
    hash: Option<String>,
    plaintext: Option<String>,
}

impl Credential {
    /// Wrap a hash loaded from storage.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            plaintext: None,
        }
    }

    /// Hash `plaintext` with bcrypt and keep both for same-request validation.
    pub fn set(&mut self, plaintext: &str, cost: u32) -> Result<(), AuthError> {
        let hash = bcrypt::hash(plaintext, cost)
            .map_err(|e| AuthError::Hashing(format!("bcrypt hash: {e}")))?;
        self.hash = Some(hash);
        self.plaintext = Some(plaintext.to_string());
        Ok(())
    }

    /// Check a candidate password against the stored hash.
    ///
    /// Returns `Ok(false)` on a mismatch and `Err` only when the stored hash is
    /// missing or corrupt.
    pub fn matches(&self, candidate: &str) -> Result<bool, AuthError> {
        let hash = self
            .hash
            .as_deref()
            .ok_or_else(|| AuthError::Internal("credential has no hash".into()))?;
        bcrypt::verify(candidate, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Plaintext from the last [`Credential::set`], if still held.
    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    /// Drop the plaintext once validation is done.
    pub fn forget_plaintext(&mut self) {
        self.plaintext = None;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("hash", &self.hash.as_ref().map(|_| "[redacted]"))
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Build a fresh credential on the blocking pool so request tasks are not
/// stalled by bcrypt.
pub async fn hash_password(plaintext: String, cost: u32) -> Result<Credential, AuthError> {
    tokio::task::spawn_blocking(move || -> Result<Credential, AuthError> {
        let mut credential = Credential::default();
        credential.set(&plaintext, cost)?;
        Ok(credential)
    })
    .await
    .map_err(|e| AuthError::Internal(format!("hashing task: {e}")))?
}

/// [`Credential::matches`] on the blocking pool.
pub async fn verify_password(credential: Credential, candidate: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || credential.matches(&candidate))
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn matches_correct_and_rejects_wrong_password() {
        let mut credential = Credential::default();
        credential.set("pa55word-long", TEST_COST).unwrap();

        assert!(credential.hash().unwrap().starts_with("$2"));
        assert_eq!(credential.plaintext(), Some("pa55word-long"));
        assert!(credential.matches("pa55word-long").unwrap());
        assert!(!credential.matches("pa55word-wrong").unwrap());
    }

    #[test]
    fn same_password_hashes_differently() {
        let mut a = Credential::default();
        let mut b = Credential::default();
        a.set("repeatable", TEST_COST).unwrap();
        b.set("repeatable", TEST_COST).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_panic() {
        let credential = Credential::from_hash("not-a-bcrypt-hash");
        assert!(matches!(
            credential.matches("whatever"),
            Err(AuthError::Internal(_))
        ));
    }

    #[test]
    fn missing_hash_is_an_error() {
        assert!(matches!(
            Credential::default().matches("whatever"),
            Err(AuthError::Internal(_))
        ));
    }

    #[test]
    fn debug_output_is_redacted() {
        let mut credential = Credential::default();
        credential.set("super-secret", TEST_COST).unwrap();
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("$2"));
    }

    #[test]
    fn loaded_hash_carries_no_plaintext() {
        let mut original = Credential::default();
        original.set("from-storage", TEST_COST).unwrap();
        let loaded = Credential::from_hash(original.hash().unwrap());
        assert!(loaded.plaintext().is_none());
        assert!(loaded.matches("from-storage").unwrap());
    }

    #[tokio::test]
    async fn blocking_helpers_round_trip() {
        let credential = hash_password("offloaded-pass".into(), TEST_COST)
            .await
            .unwrap();
        assert!(verify_password(credential.clone(), "offloaded-pass".into())
            .await
            .unwrap());
        assert!(!verify_password(credential, "nope-nope".into()).await.unwrap());
    }
}
