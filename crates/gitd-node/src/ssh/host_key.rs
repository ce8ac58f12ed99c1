//! Persistent SSH host key.

use russh_keys::key::KeyPair;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Loads the host key at `path`, generating and saving a new Ed25519 key
/// if the file does not exist.
///
/// New key files are written with mode `0600`.
pub fn load_or_generate(path: &Path) -> io::Result<KeyPair> {
    if path.exists() {
        let key = russh_keys::load_secret_key(path, None).map_err(io::Error::other)?;
        tracing::info!(path = %path.display(), "Loaded SSH host key");
        return Ok(key);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let key = KeyPair::generate_ed25519();
    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).map_err(io::Error::other)?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&pem)?;
    file.sync_all()?;

    tracing::info!(path = %path.display(), "Generated SSH host key");
    Ok(key)
}
