//! Credential-store-backed authentication.
//!
//! Users are loaded from a YAML file:
//!
//! ```yaml
//! users:
//!   alice:
//!     password_hash: "$argon2id$v=19$m=19456,t=2,p=1$..."
//!     authorized_keys:
//!       - "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA... alice@laptop"
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::authenticator::Authenticator;
use crate::error::{AuthError, Result};
use crate::password::{hash_password, verify_password};
use crate::ssh_key::PublicKey;

/// Stand-in verified when a user has no password, so rejecting an unknown
/// user costs the same argon2 work as rejecting a wrong password.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("gitd-no-such-user").ok());

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    users: HashMap<String, UserEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    password_hash: Option<String>,
    #[serde(default)]
    authorized_keys: Vec<String>,
}

/// Stored credentials for one user.
#[derive(Debug, Clone, Default)]
struct UserCredentials {
    password_hash: Option<String>,
    authorized_keys: Vec<PublicKey>,
}

/// Thread-safe in-memory credential store.
#[derive(Debug, Default)]
pub struct CredentialStore {
    users: RwLock<HashMap<String, UserCredentials>>,
}

impl CredentialStore {
    /// Creates an empty store, which rejects everyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from a YAML credentials file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let store = Self::from_yaml(&content)?;
        tracing::info!(
            path = %path.as_ref().display(),
            users = store.user_count(),
            "Loaded SSH credentials"
        );
        Ok(store)
    }

    /// Parses a store from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: CredentialsFile =
            serde_yaml::from_str(content).map_err(|e| AuthError::Parse(e.to_string()))?;

        let mut users = HashMap::with_capacity(file.users.len());
        for (username, entry) in file.users {
            let authorized_keys = entry
                .authorized_keys
                .iter()
                .map(String::as_str)
                .map(PublicKey::parse_openssh)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| AuthError::Parse(format!("user '{username}': {e}")))?;

            users.insert(
                username,
                UserCredentials {
                    password_hash: entry.password_hash,
                    authorized_keys,
                },
            );
        }

        Ok(Self {
            users: RwLock::new(users),
        })
    }

    /// Sets (or replaces) a user's password.
    pub fn set_password(&self, username: &str, password: &str) -> Result<()> {
        let hash = hash_password(password)?;
        self.users
            .write()
            .entry(username.to_string())
            .or_default()
            .password_hash = Some(hash);
        Ok(())
    }

    /// Authorizes an additional public key for a user.
    pub fn add_authorized_key(&self, username: &str, key: PublicKey) {
        self.users
            .write()
            .entry(username.to_string())
            .or_default()
            .authorized_keys
            .push(key);
    }

    /// Number of known users.
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}

#[async_trait]
impl Authenticator for CredentialStore {
    fn name(&self) -> &'static str {
        "credential-store"
    }

    async fn authenticate_password(&self, username: &str, password: &str) -> bool {
        let stored = self
            .users
            .read()
            .get(username)
            .and_then(|u| u.password_hash.clone());
        let known = stored.is_some();
        let Some(hash) = stored.or_else(|| DUMMY_HASH.clone()) else {
            return false;
        };

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await;

        match verified {
            Ok(Ok(true)) if known => true,
            Ok(Ok(_)) if !known => {
                tracing::warn!(username = %username, "Password authentication for unknown user");
                false
            }
            Ok(Ok(_)) => {
                tracing::warn!(username = %username, "Password authentication failed");
                false
            }
            Ok(Err(e)) => {
                tracing::error!(username = %username, error = %e, "Stored password hash is invalid");
                false
            }
            Err(e) => {
                tracing::error!(username = %username, error = %e, "Password verification task failed");
                false
            }
        }
    }

    async fn authenticate_public_key(&self, username: &str, key: &PublicKey) -> bool {
        let authorized = self
            .users
            .read()
            .get(username)
            .is_some_and(|u| u.authorized_keys.contains(key));

        if !authorized {
            tracing::warn!(
                username = %username,
                fingerprint = %key.fingerprint(),
                "Public key not authorized"
            );
        }
        authorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_key::tests::{ALICE_KEY, BOB_KEY};

    #[tokio::test]
    async fn test_password_authentication() {
        let store = CredentialStore::new();
        store.set_password("alice", "correct horse").unwrap();

        assert!(store.authenticate_password("alice", "correct horse").await);
        assert!(!store.authenticate_password("alice", "wrong").await);
        assert!(!store.authenticate_password("mallory", "correct horse").await);
    }

    #[tokio::test]
    async fn test_unknown_user_is_verified_against_stand_in() {
        let dummy = DUMMY_HASH.as_deref().unwrap();
        let real = hash_password("anything").unwrap();
        // Same algorithm and cost parameters as a stored hash.
        let params = |h: &str| h.rsplitn(3, '$').nth(2).unwrap().to_string();
        assert_eq!(params(dummy), params(&real));

        let store = CredentialStore::new();
        store.add_authorized_key("keyonly", PublicKey::parse_openssh(ALICE_KEY).unwrap());
        assert!(!store.authenticate_password("mallory", "gitd-no-such-user").await);
        assert!(!store.authenticate_password("keyonly", "gitd-no-such-user").await);
    }

    #[tokio::test]
    async fn test_public_key_authentication() {
        let store = CredentialStore::new();
        let alice = PublicKey::parse_openssh(ALICE_KEY).unwrap();
        let bob = PublicKey::parse_openssh(BOB_KEY).unwrap();
        store.add_authorized_key("alice", alice.clone());

        assert!(store.authenticate_public_key("alice", &alice).await);
        assert!(!store.authenticate_public_key("alice", &bob).await);
        assert!(!store.authenticate_public_key("bob", &alice).await);
    }

    #[tokio::test]
    async fn test_load_from_yaml() {
        let hash = hash_password("s3cret").unwrap();
        let yaml = format!(
            "users:\n  alice:\n    password_hash: \"{hash}\"\n    authorized_keys:\n      - \"{ALICE_KEY}\"\n  bob:\n    authorized_keys: []\n"
        );

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("users.yaml");
        std::fs::write(&path, yaml).unwrap();

        let store = CredentialStore::load(&path).unwrap();
        assert_eq!(store.user_count(), 2);
        assert!(store.authenticate_password("alice", "s3cret").await);
        assert!(!store.authenticate_password("bob", "s3cret").await);

        let key = PublicKey::parse_openssh(ALICE_KEY).unwrap();
        assert!(store.authenticate_public_key("alice", &key).await);
    }

    #[test]
    fn test_invalid_key_in_file() {
        let yaml = "users:\n  alice:\n    authorized_keys:\n      - \"ssh-ed25519 nope\"\n";
        assert!(matches!(
            CredentialStore::from_yaml(yaml),
            Err(AuthError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_file() {
        let store = CredentialStore::from_yaml("users: {}\n").unwrap();
        assert_eq!(store.user_count(), 0);
    }
}
