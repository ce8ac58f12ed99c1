//! SSH public key parsing and fingerprints.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{AuthError, Result};

/// Key algorithms accepted in authorized key lists.
const SUPPORTED_KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// An SSH public key in wire format.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_type: String,
    blob: Vec<u8>,
}

impl PublicKey {
    /// Parses an OpenSSH `authorized_keys` style line:
    /// `<type> <base64> [comment]`.
    pub fn parse_openssh(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let (Some(key_type), Some(data)) = (parts.next(), parts.next()) else {
            return Err(AuthError::InvalidKey(
                "key must have at least type and data parts".to_string(),
            ));
        };
        Self::from_base64(key_type, data)
    }

    /// Builds a key from its algorithm name and base64 wire blob, as
    /// presented by the SSH transport during authentication.
    pub fn from_base64(key_type: &str, data: &str) -> Result<Self> {
        if !SUPPORTED_KEY_TYPES.contains(&key_type) {
            return Err(AuthError::InvalidKey(format!(
                "unsupported key type: {key_type}"
            )));
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| AuthError::InvalidKey(format!("invalid base64 encoding: {e}")))?;

        let embedded = embedded_key_type(&blob)?;
        if embedded != key_type {
            return Err(AuthError::InvalidKey(format!(
                "key type mismatch: declared {key_type}, encoded {embedded}"
            )));
        }

        Ok(Self {
            key_type: key_type.to_string(),
            blob,
        })
    }

    /// Builds a key from its raw wire blob, taking the algorithm name from
    /// the blob itself.
    pub fn from_blob(blob: Vec<u8>) -> Result<Self> {
        let key_type = embedded_key_type(&blob)?.to_string();
        if !SUPPORTED_KEY_TYPES.contains(&key_type.as_str()) {
            return Err(AuthError::InvalidKey(format!(
                "unsupported key type: {key_type}"
            )));
        }
        Ok(Self { key_type, blob })
    }

    /// Algorithm name, e.g. `ssh-ed25519`.
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// SHA-256 fingerprint in the `ssh-keygen -l` format.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(&self.blob);
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
        format!("SHA256:{encoded}")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_type", &self.key_type)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Reads the length-prefixed algorithm name at the start of a key blob.
fn embedded_key_type(blob: &[u8]) -> Result<&str> {
    let Some(len_bytes) = blob.get(..4) else {
        return Err(AuthError::InvalidKey("key data too short".to_string()));
    };
    let type_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

    let name = blob
        .get(4..4usize.saturating_add(type_len))
        .ok_or_else(|| AuthError::InvalidKey("key data truncated".to_string()))?;
    std::str::from_utf8(name).map_err(|_| AuthError::InvalidKey("key type is not UTF-8".to_string()))
}
