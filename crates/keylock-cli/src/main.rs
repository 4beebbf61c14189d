//! keylock - acquire, release and renew distributed locks from the shell
//!
//! Store settings come from an optional config file layered under
//! `KEYLOCK__...` environment variables, e.g.
//! `KEYLOCK__STORE__STANDALONE__ADDR=10.0.0.5:6379`.
//!
//! Exit status: 0 on success, 2 when the lock is contended or no longer
//! owned, 1 on any other error.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keylock_common::KeylockConfig;
use keylock_core::{LockCoordinator, LockError};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "keylock", version, about = "Distributed locks on a Redis-compatible store")]
struct Cli {
    /// Config file (toml, yaml or json)
    #[arg(short = 'c', long = "config", env = "KEYLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the store answers
    Ping,
    /// Acquire a lock and print its owner token
    Acquire {
        name: String,
        /// Lease in seconds
        #[arg(long)]
        ttl: u64,
        /// Milliseconds to keep trying while the lock is held elsewhere
        #[arg(long, default_value_t = 0)]
        wait: u64,
        /// Use this owner token instead of a generated one
        #[arg(long)]
        token: Option<String>,
    },
    /// Release a lock held by TOKEN
    Release { name: String, token: String },
    /// Reset the lease of a lock held by TOKEN
    Renew {
        name: String,
        token: String,
        /// New lease in seconds
        #[arg(long)]
        ttl: u64,
    },
    /// Print the token currently holding a lock
    Holder { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("keylock: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = KeylockConfig::load(cli.config.as_deref()).context("failed to load config")?;
    debug!(topology = %config.store.topology, "Configuration loaded");
    let locks = LockCoordinator::connect(&config).await?;

    match cli.command {
        Command::Ping => {
            locks.store().ping().await?;
            println!("PONG");
        }
        Command::Acquire {
            name,
            ttl,
            wait,
            token,
        } => {
            let max_wait = Duration::from_millis(wait);
            let token = match token {
                Some(token) => locks.acquire_with_token(&name, &token, ttl, max_wait).await?,
                None => locks.acquire(&name, ttl, max_wait).await?,
            };
            println!("{}", token);
        }
        Command::Release { name, token } => {
            locks.release(&name, &token).await?;
        }
        Command::Renew { name, token, ttl } => {
            locks.renew(&name, &token, ttl).await?;
        }
        Command::Holder { name } => match locks.holder(&name).await? {
            Some(token) => println!("{}", token),
            None => println!("(free)"),
        },
    }

    locks.store().close().await?;
    Ok(())
}

fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<LockError>() {
        Some(e) if e.is_contention() => 2,
        Some(LockError::RenewMismatch { .. }) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_acquire() {
        let cli = Cli::try_parse_from([
            "keylock", "--config", "lock.toml", "acquire", "jobs", "--ttl", "30", "--wait", "500",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lock.toml")));
        match cli.command {
            Command::Acquire {
                name,
                ttl,
                wait,
                token,
            } => {
                assert_eq!(name, "jobs");
                assert_eq!(ttl, 30);
                assert_eq!(wait, 500);
                assert!(token.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_requires_ttl() {
        assert!(Cli::try_parse_from(["keylock", "acquire", "jobs"]).is_err());
        assert!(Cli::try_parse_from(["keylock", "renew", "jobs", "t1"]).is_err());
    }

    #[test]
    fn test_parse_release() {
        let cli = Cli::try_parse_from(["keylock", "release", "jobs", "t1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Release { ref name, ref token } if name == "jobs" && token == "t1"
        ));
    }

    #[test]
    fn test_exit_status() {
        let held = anyhow::Error::new(LockError::AlreadyHeld {
            name: "x".to_string(),
        });
        assert_eq!(exit_status(&held), 2);

        let lost = anyhow::Error::new(LockError::RenewMismatch {
            name: "x".to_string(),
        });
        assert_eq!(exit_status(&lost), 2);

        assert_eq!(exit_status(&anyhow::Error::new(LockError::NotReady)), 1);
        assert_eq!(exit_status(&anyhow::anyhow!("config missing")), 1);
    }
}
