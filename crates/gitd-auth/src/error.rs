//! Error types for the auth crate.

use thiserror::Error;

/// Errors that can occur while loading or managing credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credentials file could not be read.
    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),

    /// The credentials file is malformed.
    #[error("invalid credentials file: {0}")]
    Parse(String),

    /// An SSH public key could not be parsed.
    #[error("invalid SSH key: {0}")]
    InvalidKey(String),

    /// Password hashing failed.
    #[error("password hashing error: {0}")]
    Hash(String),
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
