//! Authentication strategies for the SSH transport.

use async_trait::async_trait;
use std::fmt;

use crate::ssh_key::PublicKey;

/// Decides whether an SSH client may open a session.
///
/// Implementations are shared by every session, so they must be cheap to
/// call concurrently.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks a username and password.
    async fn authenticate_password(&self, username: &str, password: &str) -> bool;

    /// Checks that `key` is authorized for `username`.
    async fn authenticate_public_key(&self, username: &str, key: &PublicKey) -> bool;
}

/// Rejects every attempt. The default when nothing else is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl Authenticator for DenyAll {
    fn name(&self) -> &'static str {
        "deny-all"
    }

    async fn authenticate_password(&self, username: &str, _password: &str) -> bool {
        tracing::debug!(username = %username, "Password authentication denied");
        false
    }

    async fn authenticate_public_key(&self, username: &str, key: &PublicKey) -> bool {
        tracing::debug!(
            username = %username,
            fingerprint = %key.fingerprint(),
            "Public key authentication denied"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_key::tests::ALICE_KEY;

    #[tokio::test]
    async fn test_deny_all() {
        let auth = DenyAll;
        let key = PublicKey::parse_openssh(ALICE_KEY).unwrap();

        assert!(!auth.authenticate_password("alice", "anything").await);
        assert!(!auth.authenticate_password("", "").await);
        assert!(!auth.authenticate_public_key("alice", &key).await);
    }
}
