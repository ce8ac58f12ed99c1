//! # gitd Auth
//!
//! Authentication for the gitd SSH transport.
//!
//! Authentication is a pluggable capability: the SSH server holds an
//! `Arc<dyn Authenticator>` and asks it about every password or public key
//! presented by a client. Two strategies are provided:
//!
//! - [`DenyAll`] - rejects everyone; the default.
//! - [`CredentialStore`] - argon2 password hashes and OpenSSH authorized
//!   keys per user, loaded from a YAML file.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gitd_auth::{Authenticator, CredentialStore};
//!
//! let store = CredentialStore::load("/etc/gitd/users.yaml").unwrap();
//! let authenticator: Arc<dyn Authenticator> = Arc::new(store);
//! ```

pub mod authenticator;
pub mod credentials;
pub mod error;
pub mod password;
pub mod ssh_key;

pub use authenticator::{Authenticator, DenyAll};
pub use credentials::CredentialStore;
pub use error::{AuthError, Result};
pub use password::{hash_password, verify_password};
pub use ssh_key::PublicKey;
