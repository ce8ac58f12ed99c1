//! # SSH transport
//!
//! Serves `git-upload-pack <repo>` and `git-receive-pack <repo>` exec
//! requests over `russh`. Clients authenticate against the configured
//! [`Authenticator`](gitd_auth::Authenticator); with the default deny-all
//! strategy nobody gets in.

mod command;
mod host_key;
mod locator;
mod session;

pub use command::{split_words, CommandError, GitCommand};
pub use host_key::load_or_generate as load_or_generate_host_key;
pub use locator::SshRepositoryLocator;
pub use session::SshSession;

use gitd_auth::Authenticator;
use russh::server::{self, Server as _};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::SshConfig;

/// Hands each incoming connection to a new [`SshSession`].
#[derive(Clone)]
pub struct SshServer {
    locator: SshRepositoryLocator,
    authenticator: Arc<dyn Authenticator>,
}

impl SshServer {
    /// Creates a server over the shared locator.
    pub fn new(locator: SshRepositoryLocator, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            locator,
            authenticator,
        }
    }
}

impl server::Server for SshServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        tracing::debug!(peer = ?peer_addr, "New SSH connection");
        SshSession::new(
            self.locator.clone(),
            Arc::clone(&self.authenticator),
            peer_addr,
        )
    }
}

/// Builds the russh server configuration.
pub fn server_config(host_key: KeyPair, config: &SshConfig) -> Arc<server::Config> {
    Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY | MethodSet::PASSWORD,
        inactivity_timeout: Some(Duration::from_secs(config.inactivity_timeout_secs)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        ..Default::default()
    })
}

/// Accepts connections on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    config: Arc<server::Config>,
    mut server: SshServer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tokio::select! {
        result = server.run_on_socket(config, &listener) => result,
        _ = shutdown.cancelled() => Ok(()),
    }
}
