//! End-to-end tests for the SSH transport, driven by a russh client.

use gitd_auth::{CredentialStore, PublicKey as AuthorizedKey};
use gitd_node::config::Config;
use gitd_node::ServerLifecycle;
use russh::client;
use russh::ChannelMsg;
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct TrustingClient;

#[async_trait::async_trait]
impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct TestServer {
    _temp: TempDir,
    root: PathBuf,
    addr: SocketAddr,
    client_key: Arc<KeyPair>,
    server: ServerLifecycle,
}

async fn start_server() -> TestServer {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.http.host = LOCALHOST;
    config.http.port = 0;
    config.ssh.host = LOCALHOST;
    config.ssh.port = 0;
    config.repositories.root = temp.path().join("repositories");

    let client_key = KeyPair::generate_ed25519();
    let line = format!("ssh-ed25519 {} alice@test", client_key.public_key_base64());
    let store = CredentialStore::new();
    store.add_authorized_key("alice", AuthorizedKey::parse_openssh(&line).unwrap());
    store.set_password("bob", "s3cret").unwrap();

    let mut server = ServerLifecycle::new(config, Arc::new(store)).unwrap();
    server.start().await.unwrap();

    TestServer {
        root: server.locator().root().path().to_path_buf(),
        addr: server.ssh_addr().unwrap(),
        client_key: Arc::new(client_key),
        server,
        _temp: temp,
    }
}

async fn connect(addr: SocketAddr) -> client::Handle<TrustingClient> {
    client::connect(Arc::new(client::Config::default()), addr, TrustingClient)
        .await
        .unwrap()
}

async fn connect_as_alice(server: &TestServer) -> client::Handle<TrustingClient> {
    let mut session = connect(server.addr).await;
    assert!(session
        .authenticate_publickey("alice", Arc::clone(&server.client_key))
        .await
        .unwrap());
    session
}

#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit_status: Option<u32>,
}

async fn exec(
    session: &client::Handle<TrustingClient>,
    git_protocol: Option<&str>,
    command: &str,
    stdin: &[u8],
) -> ExecOutput {
    let mut channel = session.channel_open_session().await.unwrap();
    if let Some(protocol) = git_protocol {
        channel.set_env(false, "GIT_PROTOCOL", protocol).await.unwrap();
    }
    channel.exec(true, command).await.unwrap();
    // A rejected command may already have closed the channel.
    if !stdin.is_empty() {
        let _ = channel.data(stdin).await;
    }
    let _ = channel.eof().await;

    let mut output = ExecOutput::default();
    let mut stderr = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), channel.wait())
            .await
            .expect("channel stalled");
        match msg {
            Some(ChannelMsg::Data { data }) => output.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status }) => output.exit_status = Some(exit_status),
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }
    output.stderr = String::from_utf8_lossy(&stderr).into_owned();
    output
}

// ==================== Authentication ====================

#[tokio::test]
async fn test_public_key_authentication() {
    let mut server = start_server().await;

    let mut session = connect(server.addr).await;
    let stranger = Arc::new(KeyPair::generate_ed25519());
    assert!(!session.authenticate_publickey("alice", stranger).await.unwrap());
    assert!(!session
        .authenticate_publickey("mallory", Arc::clone(&server.client_key))
        .await
        .unwrap());
    assert!(session
        .authenticate_publickey("alice", Arc::clone(&server.client_key))
        .await
        .unwrap());

    server.server.stop().await;
}

#[tokio::test]
async fn test_password_authentication() {
    let mut server = start_server().await;

    let mut session = connect(server.addr).await;
    assert!(!session.authenticate_password("bob", "wrong").await.unwrap());
    assert!(session.authenticate_password("bob", "s3cret").await.unwrap());

    server.server.stop().await;
}

// ==================== Command Errors ====================

#[tokio::test]
async fn test_unsupported_command_fails_on_stderr() {
    let mut server = start_server().await;
    let session = connect_as_alice(&server).await;

    let output = exec(&session, None, "ls -la", b"").await;
    assert_eq!(output.exit_status, Some(1));
    assert!(output.stderr.starts_with("ERROR: "), "stderr {:?}", output.stderr);
    assert!(output.stderr.contains("unsupported command 'ls'"));
    assert!(output.stdout.is_empty());

    server.server.stop().await;
}

#[tokio::test]
async fn test_missing_repository_argument() {
    let mut server = start_server().await;
    let session = connect_as_alice(&server).await;

    let output = exec(&session, None, "git-upload-pack", b"").await;
    assert_eq!(output.exit_status, Some(1));
    assert!(output.stderr.contains("No repository path specified"));

    server.server.stop().await;
}

#[tokio::test]
async fn test_invalid_identifiers_create_nothing() {
    let mut server = start_server().await;
    let session = connect_as_alice(&server).await;

    for command in [
        "git-upload-pack '../../etc'",
        "git-receive-pack 'a/../../b'",
        "git-upload-pack 'foo.git/refs/heads/evil'",
    ] {
        let output = exec(&session, None, command, b"").await;
        assert_eq!(output.exit_status, Some(1), "command {command}");
        assert!(
            output.stderr.contains("invalid repository identifier"),
            "command {command}: {:?}",
            output.stderr
        );
    }

    assert_eq!(std::fs::read_dir(&server.root).unwrap().count(), 0);
    server.server.stop().await;
}

// ==================== Git Services ====================

#[tokio::test]
async fn test_upload_pack_creates_repository() {
    let mut server = start_server().await;
    let session = connect_as_alice(&server).await;

    let output = exec(&session, None, "git-upload-pack 'team/app'", b"0000").await;
    let repo = server.root.join("team/app.git");
    assert!(repo.join("HEAD").is_file());
    assert!(repo.join("objects").is_dir());

    if git_available() {
        assert_eq!(output.exit_status, Some(0), "stderr {:?}", output.stderr);
        // v0 advertisement of an empty repository ends with a flush packet.
        assert!(output.stdout.ends_with(b"0000"));
    }

    // The same repository is opened, not recreated, on the second request.
    let head = std::fs::read(repo.join("HEAD")).unwrap();
    let _ = exec(&session, None, "git upload-pack '/team/app.git'", b"0000").await;
    assert_eq!(std::fs::read(repo.join("HEAD")).unwrap(), head);
    let entries: Vec<_> = std::fs::read_dir(server.root.join("team"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("app.git")]);

    server.server.stop().await;
}

#[tokio::test]
async fn test_git_protocol_env_is_forwarded() {
    if !git_available() {
        return;
    }
    let mut server = start_server().await;
    let session = connect_as_alice(&server).await;

    let v2 = exec(&session, Some("version=2"), "git-upload-pack proto", b"0000").await;
    assert_eq!(v2.exit_status, Some(0), "stderr {:?}", v2.stderr);
    assert!(v2.stdout.starts_with(b"000eversion 2\n"));

    let v0 = exec(&session, None, "git-upload-pack proto", b"0000").await;
    assert_eq!(v0.exit_status, Some(0), "stderr {:?}", v0.stderr);
    assert!(!v0.stdout.starts_with(b"000eversion 2\n"));

    server.server.stop().await;
}
