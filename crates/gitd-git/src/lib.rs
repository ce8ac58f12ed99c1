//! Git protocol services for gitd.
//!
//! This crate frames smart HTTP responses in pkt-line format and runs the
//! system `git` pack services against resolved repositories, enabling
//! standard git clients to push and pull over HTTP and SSH.

mod error;
mod pktline;
mod service;

pub use error::GitError;
pub use pktline::{service_announcement, PktLineWriter, FLUSH_PKT, MAX_PKT_PAYLOAD};
pub use service::{advertise_refs, spawn, Mode, Service, GIT_PROTOCOL_ENV};

/// Result type for git service operations.
pub type Result<T> = std::result::Result<T, GitError>;
