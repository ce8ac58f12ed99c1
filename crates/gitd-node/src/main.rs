//! gitd - on-demand git server for smart HTTP and SSH.

use anyhow::Context;
use clap::Parser;
use gitd_node::config::Config;
use gitd_node::observability::init_logging;
use gitd_node::ServerLifecycle;
use std::path::PathBuf;

/// gitd - serves bare git repositories over HTTP and SSH, creating them on
/// first access
#[derive(Parser, Debug)]
#[command(name = "gitd-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen port (default: 8080)
    #[arg(long)]
    http_port: Option<u16>,

    /// SSH listen port (default: 2222)
    #[arg(long)]
    ssh_port: Option<u16>,

    /// Repository directory (default: repositories)
    #[arg(long)]
    repo_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Allow anonymous pushes over HTTP
    #[arg(long)]
    http_receive_pack: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if let Some(port) = self.ssh_port {
            config.ssh.port = port;
        }
        if let Some(dir) = self.repo_dir {
            config.repositories.root = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if self.http_receive_pack {
            config.http.receive_pack = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gitd-node: {e:#}");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level, config.logging.log_format());

    if let Err(e) = run(config).await {
        tracing::error!(error = %format!("{e:#}"), "Failed to start gitd");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = config.http.port,
        ssh_port = config.ssh.port,
        repo_dir = %config.repositories.root.display(),
        "Starting gitd"
    );

    let mut server = ServerLifecycle::from_config(config)?;
    server.start().await?;
    tracing::info!("Press Ctrl+C to stop.");
    server.run_until_shutdown().await?;
    Ok(())
}
