//! # gitd Node
//!
//! Serves a directory of bare git repositories over smart HTTP and SSH,
//! creating each repository the first time a client asks for it.
//!
//! ```text
//!   HTTP  GET/POST /{repo}/...        SSH  exec "git-upload-pack '{repo}'"
//!          │                                   │
//!   HttpRepositoryLocator               SshRepositoryLocator
//!          └──────────────┬────────────────────┘
//!                 RepositoryLocator (gitd-repo)
//!              sanitize → provision (create-if-absent)
//!                         │
//!              git upload-pack / receive-pack
//! ```
//!
//! ## Modules
//!
//! - [`config`] - YAML configuration and defaults
//! - [`http`] - smart HTTP router and handlers
//! - [`ssh`] - russh server, exec parsing and host key
//! - [`lifecycle`] - starting and stopping both transports
//! - [`observability`] - logging, metrics and request IDs
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin gitd-node -- --http-port 8080 --ssh-port 2222 --repo-dir repositories
//! git clone http://localhost:8080/team/app.git
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod ssh;

pub use config::{Config, ConfigError};
pub use lifecycle::{LifecycleError, ServerLifecycle};
