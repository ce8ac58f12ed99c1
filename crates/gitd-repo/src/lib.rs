//! # gitd Repo
//!
//! Repository location resolution for gitd.
//!
//! This crate turns untrusted repository identifiers coming from the HTTP
//! and SSH transports into safe paths under a fixed repository root, and
//! makes sure a bare repository exists there before the transport starts
//! the pack protocol exchange.
//!
//! ```rust,no_run
//! use gitd_repo::{RepositoryLocator, RepositoryProvisioner, RepositoryRoot};
//!
//! let root = RepositoryRoot::prepare("/var/lib/gitd/repositories").unwrap();
//! let locator = RepositoryLocator::new(root, RepositoryProvisioner::new());
//!
//! let handle = locator.resolve("team/app").unwrap();
//! println!("serving {}", handle.path().display());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod locator;
mod path;
mod provision;

pub use error::{RepoError, Result};
pub use locator::RepositoryLocator;
pub use path::{RepositoryPath, RepositoryRoot, MAX_IDENTIFIER_LENGTH, REPOSITORY_SUFFIX};
pub use provision::{
    ProvisionOptions, Provisioned, RepositoryHandle, RepositoryProvisioner, RepositoryState,
    DEFAULT_BRANCH,
};
