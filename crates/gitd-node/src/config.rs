//! Node configuration types.
//!
//! Configuration comes from an optional YAML file; anything it leaves out
//! falls back to [`Default`]. Command-line flags are applied on top by the
//! binary.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::observability::LogFormat;

/// Default smart HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 2222;
/// Default repository root, relative to the working directory.
pub const DEFAULT_REPOSITORY_DIR: &str = "repositories";
/// File name of the generated SSH host key.
pub const HOST_KEY_FILE: &str = "hostkey.pem";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`Config`].
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a gitd node.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Smart HTTP transport.
    pub http: HttpConfig,
    /// SSH transport.
    pub ssh: SshConfig,
    /// Repository root and provisioning.
    pub repositories: RepositoryConfig,
    /// SSH authentication strategy.
    pub auth: AuthConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Smart HTTP settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Listen port; 0 picks a free port.
    pub port: u16,
    /// Serve `git-upload-pack` (fetch and clone).
    pub upload_pack: bool,
    /// Serve `git-receive-pack` (anonymous push).
    pub receive_pack: bool,
    /// Largest gzip request body accepted, checked both compressed and
    /// inflated.
    pub max_request_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_HTTP_PORT,
            upload_pack: true,
            receive_pack: false,
            max_request_bytes: crate::http::DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl HttpConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// SSH settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Listen port; 0 picks a free port.
    pub port: u16,
    /// Host key location. Defaults to `hostkey.pem` next to the repository
    /// root.
    pub host_key: Option<PathBuf>,
    /// Idle sessions are closed after this many seconds.
    pub inactivity_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_SSH_PORT,
            host_key: None,
            inactivity_timeout_secs: 600,
        }
    }
}

impl SshConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Host key path for a repository root.
    pub fn host_key_path(&self, repository_root: &Path) -> PathBuf {
        match &self.host_key {
            Some(path) => path.clone(),
            None => repository_root
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(HOST_KEY_FILE),
        }
    }
}

/// Repository root settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Directory holding all served repositories.
    pub root: PathBuf,
    /// Branch HEAD points at in newly created repositories.
    pub default_branch: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_REPOSITORY_DIR),
            default_branch: gitd_repo::DEFAULT_BRANCH.to_string(),
        }
    }
}

/// Which authenticator the SSH server uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Reject every client.
    #[default]
    DenyAll,
    /// Users and keys from a YAML credentials file.
    Credentials {
        /// Path to the credentials file.
        path: PathBuf,
    },
}

/// Log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for gitd's own targets; `RUST_LOG` takes precedence.
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parsed output format.
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.format)
    }
}

impl Config {
    /// Reads and validates a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repositories.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "repositories.root must not be empty".to_string(),
            ));
        }
        if self.repositories.default_branch.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "repositories.default_branch must not be empty".to_string(),
            ));
        }
        if self.http.port != 0 && self.http.port == self.ssh.port && self.http.host == self.ssh.host
        {
            return Err(ConfigError::Invalid(format!(
                "http and ssh cannot share port {}",
                self.http.port
            )));
        }
        if self.http.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "http.max_request_bytes must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "unknown log format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.repositories.root, PathBuf::from("repositories"));
        assert_eq!(config.repositories.default_branch, "master");
        assert!(config.http.upload_pack);
        assert!(!config.http.receive_pack);
        assert_eq!(config.auth, AuthConfig::DenyAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "http:\n  port: 9090\n  receive_pack: true\nauth:\n  strategy: credentials\n  path: /etc/gitd/users.yaml\n",
        )
        .unwrap();

        assert_eq!(config.http.port, 9090);
        assert!(config.http.receive_pack);
        assert!(config.http.upload_pack);
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(
            config.auth,
            AuthConfig::Credentials {
                path: PathBuf::from("/etc/gitd/users.yaml")
            }
        );
    }

    #[test]
    fn test_rejects_shared_port() {
        let result = Config::from_yaml("http:\n  port: 2222\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_request_limit() {
        let result = Config::from_yaml("http:\n  max_request_bytes: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let result = Config::from_yaml("logging:\n  format: xml\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_host_key_path() {
        let ssh = SshConfig::default();
        assert_eq!(
            ssh.host_key_path(Path::new("/srv/gitd/repositories")),
            PathBuf::from("/srv/gitd/hostkey.pem")
        );

        let ssh = SshConfig {
            host_key: Some(PathBuf::from("/etc/gitd/key.pem")),
            ..SshConfig::default()
        };
        assert_eq!(
            ssh.host_key_path(Path::new("/srv/gitd/repositories")),
            PathBuf::from("/etc/gitd/key.pem")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/gitd.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
