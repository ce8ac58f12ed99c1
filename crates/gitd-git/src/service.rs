//! Git pack services backed by the system `git` binary.
//!
//! gitd never parses packs itself: `git upload-pack` serves fetches and
//! clones, `git receive-pack` accepts pushes. Smart HTTP runs them in
//! `--stateless-rpc` mode, one negotiation round per request; SSH runs them
//! as long-lived processes wired to the channel.
//!
//! See: https://git-scm.com/docs/http-protocol

use crate::pktline::{service_announcement, PktLineWriter};
use crate::{GitError, Result};
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::{Child, Command};

/// Environment variable carrying the client's protocol version request.
pub const GIT_PROTOCOL_ENV: &str = "GIT_PROTOCOL";

/// A git pack service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `git-upload-pack`: fetch and clone.
    UploadPack,
    /// `git-receive-pack`: push.
    ReceivePack,
}

impl Service {
    /// Wire name, e.g. `git-upload-pack`.
    pub fn name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// `git` subcommand implementing the service.
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the RPC response.
    pub fn result_content_type(self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl FromStr for Service {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(GitError::UnknownService(other.to_string())),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the service process talks to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One request body in, one response out (smart HTTP).
    StatelessRpc,
    /// Full-duplex conversation over a long-lived stream (SSH).
    Session,
}

fn wants_v2(protocol: Option<&str>) -> bool {
    protocol.is_some_and(|p| p.split(':').any(|part| part == "version=2"))
}

fn command(service: Service, protocol: Option<&str>) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg(service.subcommand());
    if let Some(protocol) = protocol {
        cmd.env(GIT_PROTOCOL_ENV, protocol);
    }
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.kill_on_drop(true);
    cmd
}

/// Produces the smart HTTP `info/refs` body for `service`.
///
/// Protocol v0/v1 responses are prefixed with the `# service=` announcement
/// and a flush packet; protocol v2 capability advertisements are not.
#[tracing::instrument(skip(repo, protocol), fields(repo = %repo.display()))]
pub async fn advertise_refs(repo: &Path, service: Service, protocol: Option<&str>) -> Result<Bytes> {
    let mut cmd = command(service, protocol);
    cmd.arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd.output().await.map_err(|source| GitError::Spawn {
        command: service.subcommand(),
        source,
    })?;

    if !output.status.success() {
        return Err(GitError::Failed {
            command: service.subcommand(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut writer = PktLineWriter::new();
    if !wants_v2(protocol) {
        writer.append_framed(&service_announcement(service.name()));
    }
    writer.append_framed(&output.stdout);

    tracing::debug!(bytes = output.stdout.len(), "Advertised refs");
    Ok(writer.finish())
}

/// Spawns the service process with all three standard streams piped.
///
/// The child is killed if its handle is dropped before it exits.
pub fn spawn(repo: &Path, service: Service, mode: Mode, protocol: Option<&str>) -> Result<Child> {
    let mut cmd = command(service, protocol);
    if mode == Mode::StatelessRpc {
        cmd.arg("--stateless-rpc");
    }
    if service == Service::UploadPack && mode == Mode::Session {
        cmd.arg("--strict");
    }
    cmd.arg(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(
        service = %service,
        mode = ?mode,
        repo = %repo.display(),
        "Spawning git service"
    );

    cmd.spawn().map_err(|source| GitError::Spawn {
        command: service.subcommand(),
        source,
    })
}
