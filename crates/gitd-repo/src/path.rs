//! Repository identifier sanitization.
//!
//! Turns an untrusted identifier taken from an HTTP path or an SSH command
//! argument into a [`RepositoryPath`] that is guaranteed to live inside the
//! [`RepositoryRoot`]. Sanitization is purely lexical and never touches the
//! filesystem.

use crate::{RepoError, Result};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Suffix carried by every served repository directory.
pub const REPOSITORY_SUFFIX: &str = ".git";

/// Longest identifier accepted from a client, in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 4096;

/// The directory that contains all served repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRoot {
    path: PathBuf,
}

impl RepositoryRoot {
    /// Wraps an existing absolute directory path.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] if the path is relative.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("repository root must be absolute: {}", path.display()),
            ));
        }
        Ok(Self { path })
    }

    /// Creates the directory if needed and returns its canonical form.
    ///
    /// Relative paths are resolved against the current working directory.
    pub fn prepare(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            tracing::info!(path = %path.display(), "Created repository root");
        }
        Self::new(path.canonicalize()?)
    }

    /// Returns the root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalizes a client-supplied identifier into a path under this root.
    ///
    /// Rules, in order:
    /// 1. a single leading `/` is stripped;
    /// 2. a single matching pair of surrounding `'` or `"` is stripped;
    /// 3. `.git` is appended unless already present;
    /// 4. `..` segments and anything resolving outside the root are rejected;
    /// 5. only the final segment may end in `.git`.
    ///
    /// Empty and `.` segments are dropped, so `a//b/./c` names `a/b/c.git`.
    pub fn sanitize(&self, identifier: &str) -> Result<RepositoryPath> {
        if identifier.len() > MAX_IDENTIFIER_LENGTH {
            return Err(RepoError::invalid(identifier, "identifier too long"));
        }
        if identifier.chars().any(char::is_control) {
            return Err(RepoError::invalid(
                identifier,
                "identifier contains control characters",
            ));
        }

        let name = identifier.strip_prefix('/').unwrap_or(identifier);
        let name = strip_quotes(name).map_err(|reason| RepoError::invalid(identifier, reason))?;
        if name.starts_with('/') {
            return Err(RepoError::invalid(identifier, "absolute path"));
        }

        let mut segments = Vec::new();
        for segment in name.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(RepoError::invalid(
                        identifier,
                        "parent directory traversal",
                    ))
                }
                other => segments.push(other),
            }
        }

        let Some(last) = segments.pop() else {
            return Err(RepoError::invalid(identifier, "empty repository name"));
        };
        // Every repository directory ends in `.git`, so this also keeps a new
        // repository from being created inside an existing one.
        if segments.iter().any(|s| s.ends_with(REPOSITORY_SUFFIX)) {
            return Err(RepoError::invalid(
                identifier,
                "repository nested inside another repository",
            ));
        }
        if last == REPOSITORY_SUFFIX {
            return Err(RepoError::invalid(identifier, "empty repository name"));
        }
        let last = if last.ends_with(REPOSITORY_SUFFIX) {
            last.to_string()
        } else {
            format!("{last}{REPOSITORY_SUFFIX}")
        };

        let relative: PathBuf = segments
            .into_iter()
            .map(str::to_string)
            .chain(std::iter::once(last))
            .collect();

        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(RepoError::invalid(identifier, "escapes repository root"));
        }

        let absolute = self.path.join(&relative);
        if absolute == self.path || !absolute.starts_with(&self.path) {
            return Err(RepoError::invalid(identifier, "escapes repository root"));
        }

        Ok(RepositoryPath { relative, absolute })
    }
}

/// Strips one matching pair of surrounding quotes.
fn strip_quotes(name: &str) -> std::result::Result<&str, &'static str> {
    for quote in ['\'', '"'] {
        let opens = name.starts_with(quote);
        let closes = name.len() > 1 && name.ends_with(quote);
        match (opens, closes) {
            (true, true) => {
                let inner = &name[1..name.len() - 1];
                if inner.starts_with(['\'', '"']) || inner.ends_with(['\'', '"']) {
                    return Err("nested quotes");
                }
                return Ok(inner);
            }
            (false, false) => continue,
            _ => return Err("unbalanced quotes"),
        }
    }
    Ok(name)
}

/// A sanitized repository location, relative to a [`RepositoryRoot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPath {
    relative: PathBuf,
    absolute: PathBuf,
}

impl RepositoryPath {
    /// Path relative to the repository root, always ending in `.git`.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Path joined onto the repository root.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}
