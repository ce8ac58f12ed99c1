//! Per-connection SSH handler.
//!
//! Authentication is delegated to the configured [`Authenticator`]. After
//! that, every session channel may carry one `exec` request naming a git
//! pack service; the service process is wired to the channel until it
//! exits.

use gitd_auth::{Authenticator, PublicKey as AuthorizedKey};
use gitd_git::{Mode, GIT_PROTOCOL_ENV};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;

use super::command::GitCommand;
use super::locator::SshRepositoryLocator;
use crate::observability::METRICS;

/// SSH extended data stream for stderr.
const STDERR: u32 = 1;

/// Per-connection SSH session state.
pub struct SshSession {
    locator: SshRepositoryLocator,
    authenticator: Arc<dyn Authenticator>,
    peer_addr: Option<SocketAddr>,
    username: Option<String>,
    /// `GIT_PROTOCOL` values sent by the client, per channel.
    git_protocol: HashMap<ChannelId, String>,
    /// Stdin of the running service, per channel.
    child_stdin: HashMap<ChannelId, ChildStdin>,
}

impl SshSession {
    /// Creates a session for a new connection.
    pub fn new(
        locator: SshRepositoryLocator,
        authenticator: Arc<dyn Authenticator>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        METRICS.ssh_sessions_total.inc();
        METRICS.ssh_active_sessions.inc();
        Self {
            locator,
            authenticator,
            peer_addr,
            username: None,
            git_protocol: HashMap::new(),
            child_stdin: HashMap::new(),
        }
    }

    fn decide(&mut self, method: &'static str, user: &str, accepted: bool) -> Auth {
        METRICS.record_ssh_auth(method, accepted);
        if accepted {
            tracing::info!(
                peer = ?self.peer_addr,
                user = %user,
                method = method,
                authenticator = self.authenticator.name(),
                "SSH authentication accepted"
            );
            self.username = Some(user.to_string());
            Auth::Accept
        } else {
            tracing::warn!(
                peer = ?self.peer_addr,
                user = %user,
                method = method,
                authenticator = self.authenticator.name(),
                "SSH authentication rejected"
            );
            Auth::Reject {
                proceed_with_methods: None,
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        METRICS.ssh_active_sessions.dec();
    }
}

/// Reports `message` on stderr and ends the channel with status 1.
fn fail_channel(session: &mut Session, channel: ChannelId, message: &str) {
    session.extended_data(
        channel,
        STDERR,
        CryptoVec::from_slice(format!("{message}\n").as_bytes()),
    );
    finish_channel(session, channel, 1);
}

/// exit-status, EOF, close, in the order git's SSH client expects.
fn finish_channel(session: &mut Session, channel: ChannelId, exit_status: u32) {
    session.exit_status_request(channel, exit_status);
    session.eof(channel);
    session.close(channel);
}

/// Copies a process pipe to the channel until EOF.
async fn pump<R>(mut reader: R, handle: russh::server::Handle, channel: ChannelId, ext: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Error reading git output");
                break;
            }
        };
        let data = CryptoVec::from_slice(&buf[..n]);
        let sent = match ext {
            Some(ext) => handle.extended_data(channel, ext, data).await,
            None => handle.data(channel, data).await,
        };
        if sent.is_err() {
            break;
        }
    }
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let accepted = self
            .authenticator
            .authenticate_password(user, password)
            .await;
        Ok(self.decide("password", user, accepted))
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let accepted = match AuthorizedKey::from_blob(key.public_key_bytes()) {
            Ok(key) => self.authenticator.authenticate_public_key(user, &key).await,
            Err(e) => {
                tracing::debug!(user = %user, error = %e, "Unsupported client key");
                false
            }
        };
        Ok(self.decide("publickey", user, accepted))
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == GIT_PROTOCOL_ENV {
            tracing::debug!(value = %variable_value, "Client requested git protocol");
            self.git_protocol
                .insert(channel, variable_value.to_string());
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let line = String::from_utf8_lossy(data);
        tracing::info!(
            peer = ?self.peer_addr,
            user = ?self.username,
            command = %line,
            "SSH exec request"
        );
        session.channel_success(channel);

        let command = match GitCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(command = %line, error = %e, "Rejected SSH command");
                fail_channel(session, channel, &format!("ERROR: {e}"));
                return Ok(());
            }
        };

        let repo = match self
            .locator
            .resolve_root_directory(command.service.name(), &command.args)
            .await
        {
            Ok(repo) => repo,
            Err(e) => {
                fail_channel(session, channel, &format!("ERROR: {e}"));
                return Ok(());
            }
        };

        let protocol = self.git_protocol.get(&channel).map(String::as_str);
        let mut child = match gitd_git::spawn(&repo, command.service, Mode::Session, protocol) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start git service");
                fail_channel(session, channel, "ERROR: failed to start git service");
                return Ok(());
            }
        };

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            fail_channel(session, channel, "ERROR: failed to start git service");
            return Ok(());
        };
        self.child_stdin.insert(channel, stdin);

        let handle = session.handle();
        let service = command.service;
        tokio::spawn(async move {
            tokio::join!(
                pump(stdout, handle.clone(), channel, None),
                pump(stderr, handle.clone(), channel, Some(STDERR)),
            );

            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to wait for git service");
                    1
                }
            };
            tracing::debug!(service = %service, exit_code, "Git service finished");

            let _ = handle.exit_status_request(channel, exit_code).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });

        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(stdin) = self.child_stdin.get_mut(&channel) {
            if let Err(e) = stdin.write_all(data).await {
                tracing::debug!(error = %e, "Git service closed stdin");
                self.child_stdin.remove(&channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping stdin signals EOF to the service.
        self.child_stdin.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.child_stdin.remove(&channel);
        self.git_protocol.remove(&channel);
        Ok(())
    }
}
