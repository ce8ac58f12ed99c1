//! Server lifecycle: owns the repository root and both listeners.

use gitd_auth::{AuthError, Authenticator, CredentialStore, DenyAll};
use gitd_repo::{ProvisionOptions, RepositoryLocator, RepositoryProvisioner, RepositoryRoot};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AuthConfig, Config};
use crate::http::{self, HttpState};
use crate::ssh::{self, SshRepositoryLocator, SshServer};

/// Fatal, process-level errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A listener could not be bound.
    #[error("failed to start {transport} listener on {addr}: {source}")]
    ListenerStartup {
        /// `http` or `ssh`.
        transport: &'static str,
        /// Requested bind address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A listener stopped serving while the server was running.
    #[error("{transport} listener exited unexpectedly: {reason}")]
    ListenerExited {
        /// `http` or `ssh`.
        transport: &'static str,
        /// What the listener task reported.
        reason: String,
    },

    /// `start` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,

    /// The SSH host key could not be loaded or created.
    #[error("failed to load SSH host key {}: {source}", path.display())]
    HostKey {
        /// Key file location.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The repository root could not be created.
    #[error("failed to prepare repository root {}: {source}", path.display())]
    RepositoryRoot {
        /// Configured root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configured authenticator could not be built.
    #[error("failed to load authenticator: {0}")]
    Auth(#[from] AuthError),
}

/// Builds the authenticator selected in the configuration.
pub fn authenticator_from_config(
    config: &AuthConfig,
) -> Result<Arc<dyn Authenticator>, AuthError> {
    Ok(match config {
        AuthConfig::DenyAll => Arc::new(DenyAll),
        AuthConfig::Credentials { path } => Arc::new(CredentialStore::load(path)?),
    })
}

struct Listener {
    transport: &'static str,
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl Listener {
    async fn stop(self) {
        self.shutdown.cancel();
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(transport = self.transport, error = %e, "Listener exited with error")
            }
            Err(e) => {
                tracing::error!(transport = self.transport, error = %e, "Listener task failed")
            }
        }
        tracing::info!(transport = self.transport, addr = %self.addr, "Listener stopped");
    }
}

struct Running {
    http: Listener,
    ssh: Listener,
}

/// Starts and stops the HTTP and SSH transports over one repository root.
pub struct ServerLifecycle {
    config: Config,
    locator: RepositoryLocator,
    authenticator: Arc<dyn Authenticator>,
    running: Option<Running>,
}

impl ServerLifecycle {
    /// Prepares the repository root. Nothing is bound until
    /// [`start`](Self::start).
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, LifecycleError> {
        let root = RepositoryRoot::prepare(&config.repositories.root).map_err(|source| {
            LifecycleError::RepositoryRoot {
                path: config.repositories.root.clone(),
                source,
            }
        })?;
        tracing::info!(root = %root.path().display(), "Repository root ready");

        let provisioner = RepositoryProvisioner::with_options(ProvisionOptions {
            default_branch: config.repositories.default_branch.clone(),
        });

        Ok(Self {
            locator: RepositoryLocator::new(root, provisioner),
            config,
            authenticator,
            running: None,
        })
    }

    /// Builds the lifecycle with the authenticator named in `config`.
    pub fn from_config(config: Config) -> Result<Self, LifecycleError> {
        let authenticator = authenticator_from_config(&config.auth)?;
        Self::new(config, authenticator)
    }

    /// The shared repository locator.
    pub fn locator(&self) -> &RepositoryLocator {
        &self.locator
    }

    /// Whether both listeners are up.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound HTTP address while running.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.http.addr)
    }

    /// Bound SSH address while running.
    pub fn ssh_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.ssh.addr)
    }

    /// Binds and starts HTTP, then SSH.
    ///
    /// If SSH cannot start, HTTP is stopped again before the error is
    /// returned.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }

        let http = self.start_http().await?;
        tracing::info!(addr = %http.addr, "HTTP git server started");

        let ssh = match self.start_ssh().await {
            Ok(ssh) => ssh,
            Err(e) => {
                tracing::error!(error = %e, "SSH startup failed, stopping HTTP");
                http.stop().await;
                return Err(e);
            }
        };
        tracing::info!(addr = %ssh.addr, "SSH git server started");

        tracing::info!(
            http_url = %format!("http://{}/", http.addr),
            ssh_url = %format!("ssh://git@{}/", ssh.addr),
            "gitd is ready"
        );
        self.running = Some(Running { http, ssh });
        Ok(())
    }

    async fn start_http(&self) -> Result<Listener, LifecycleError> {
        let requested = self.config.http.bind_addr();
        let listener = bind("http", requested).await?;
        let addr = local_addr("http", requested, &listener)?;

        let router = http::create_router(HttpState::new(self.locator.clone(), &self.config.http));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(http::serve(listener, router, shutdown.clone()));

        Ok(Listener {
            transport: "http",
            addr,
            shutdown,
            task,
        })
    }

    async fn start_ssh(&self) -> Result<Listener, LifecycleError> {
        let key_path = self.config.ssh.host_key_path(self.locator.root().path());
        let key_path_for_task = key_path.clone();
        let host_key =
            tokio::task::spawn_blocking(move || ssh::load_or_generate_host_key(&key_path_for_task))
                .await
                .map_err(io::Error::other)
                .and_then(|result| result)
                .map_err(|source| LifecycleError::HostKey {
                    path: key_path,
                    source,
                })?;

        let requested = self.config.ssh.bind_addr();
        let listener = bind("ssh", requested).await?;
        let addr = local_addr("ssh", requested, &listener)?;

        let server = SshServer::new(
            SshRepositoryLocator::new(self.locator.clone()),
            Arc::clone(&self.authenticator),
        );
        let config = ssh::server_config(host_key, &self.config.ssh);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ssh::serve(listener, config, server, shutdown.clone()));

        Ok(Listener {
            transport: "ssh",
            addr,
            shutdown,
            task,
        })
    }

    /// Stops both listeners. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!("Stopping gitd");
        running.http.stop().await;
        running.ssh.stop().await;
        tracing::info!("gitd stopped");
    }

    /// Runs until Ctrl-C or SIGTERM, then stops.
    ///
    /// Returns [`LifecycleError::ListenerExited`] if either listener ends on
    /// its own first; the other one is stopped before returning.
    pub async fn run_until_shutdown(&mut self) -> Result<(), LifecycleError> {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`run_until_shutdown`](Self::run_until_shutdown), with the
    /// shutdown trigger supplied by the caller.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };

        let exited = tokio::select! {
            _ = shutdown => None,
            result = &mut running.http.task => Some(("http", result)),
            result = &mut running.ssh.task => Some(("ssh", result)),
        };
        let Some((transport, result)) = exited else {
            self.stop().await;
            return Ok(());
        };

        let reason = match result {
            Ok(Ok(())) => "stopped serving".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::error!(transport, reason = %reason, "Listener exited, stopping gitd");

        if let Some(running) = self.running.take() {
            let survivor = if transport == "http" {
                running.ssh
            } else {
                running.http
            };
            survivor.stop().await;
        }
        Err(LifecycleError::ListenerExited { transport, reason })
    }
}

async fn bind(transport: &'static str, addr: SocketAddr) -> Result<TcpListener, LifecycleError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| LifecycleError::ListenerStartup {
            transport,
            addr,
            source,
        })
}

fn local_addr(
    transport: &'static str,
    requested: SocketAddr,
    listener: &TcpListener,
) -> Result<SocketAddr, LifecycleError> {
    listener
        .local_addr()
        .map_err(|source| LifecycleError::ListenerStartup {
            transport,
            addr: requested,
            source,
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
