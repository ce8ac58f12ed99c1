//! Password hashing helper for gitd
//!
//! Produces entries for the SSH credentials file used by the
//! `credentials` authentication strategy.
//!
//! ## Usage
//!
//! ```bash
//! # Hash a password read from stdin
//! echo -n 's3cret' | gitd-passwd hash
//!
//! # Print a ready-to-paste users entry
//! echo -n 's3cret' | gitd-passwd entry alice --key "$(cat ~/.ssh/id_ed25519.pub)"
//!
//! # Check a public key line before adding it
//! gitd-passwd check-key "ssh-ed25519 AAAA... alice@laptop"
//! ```

use std::io::{self, Read};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gitd_auth::{hash_password, PublicKey};

/// Password hashing helper for the gitd credentials file.
#[derive(Parser, Debug)]
#[command(name = "gitd-passwd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hash a password read from stdin
    Hash,

    /// Print a YAML users entry; the password is read from stdin
    Entry {
        /// Username
        username: String,

        /// Authorized public key lines
        #[arg(short, long)]
        key: Vec<String>,

        /// Omit the password hash
        #[arg(long)]
        no_password: bool,
    },

    /// Validate an OpenSSH public key line and print its fingerprint
    CheckKey {
        /// Key line, e.g. the contents of id_ed25519.pub
        key: String,
    },
}

fn read_password() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("reading password from stdin")?;
    let password = input.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash => {
            let hash = hash_password(&read_password()?)?;
            println!("{hash}");
        }
        Commands::Entry {
            username,
            key,
            no_password,
        } => {
            for line in &key {
                PublicKey::parse_openssh(line).with_context(|| format!("invalid key: {line}"))?;
            }

            println!("users:");
            println!("  {username}:");
            if !no_password {
                let hash = hash_password(&read_password()?)?;
                println!("    password_hash: \"{hash}\"");
            }
            println!("    authorized_keys:");
            if key.is_empty() {
                println!("      []");
            }
            for line in key {
                println!("      - \"{}\"", line.trim());
            }
        }
        Commands::CheckKey { key } => {
            let parsed = PublicKey::parse_openssh(&key)?;
            println!("{} {}", parsed.key_type(), parsed.fingerprint());
        }
    }

    Ok(())
}
