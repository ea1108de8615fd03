//! Lock commands

use crate::context::CliContext;
use anyhow::{Context as _, Result};
use clap::Subcommand;
use colored::*;
use leasekit_lock::{LockManager, LockToken};
use std::time::Duration;
use tracing::info;

#[derive(Subcommand)]
pub enum LockCommands {
    /// Acquire a lock and print its token
    #[command(about = "Acquire a lock, retrying per config (prints the token)")]
    Acquire {
        /// Resource key (e.g., "order:42")
        resource: String,
        /// Lease in milliseconds (default: lock.lease_ms)
        #[arg(short, long)]
        lease_ms: Option<u64>,
        /// Try once without retrying
        #[arg(long)]
        no_wait: bool,
    },

    /// Release a lock held by TOKEN
    Release {
        resource: String,
        token: String,
    },

    /// Extend a lock held by TOKEN
    Renew {
        resource: String,
        token: String,
        /// New lease in milliseconds (default: lock.lease_ms)
        #[arg(short, long)]
        lease_ms: Option<u64>,
    },

    /// Acquire with automatic renewal until Ctrl+C
    #[command(about = "Hold a lock with background renewal until Ctrl+C or ownership is lost")]
    Hold {
        resource: String,
        #[arg(short, long)]
        lease_ms: Option<u64>,
    },

    /// Show the current holder token and remaining lease
    Inspect {
        resource: String,
    },
}

pub async fn handle_command(cmd: LockCommands, ctx: &CliContext) -> Result<()> {
    let locks = LockManager::new(ctx.store.clone());
    let keys = ctx.keys();
    let default_lease = ctx.config.lock.lease();
    let lease_or_default =
        |ms: Option<u64>| ms.map(Duration::from_millis).unwrap_or(default_lease);

    match cmd {
        LockCommands::Acquire {
            resource,
            lease_ms,
            no_wait,
        } => {
            let key = keys.key(&resource);
            let lease = lease_or_default(lease_ms);
            let lock = if no_wait {
                locks.acquire(&key, lease).await?
            } else {
                let cancel = common::shutdown::cancel_on_shutdown();
                let lock = locks
                    .try_acquire(&key, lease, &ctx.config.lock.retry_policy(), &cancel)
                    .await?;
                cancel.cancel();
                lock
            };

            match lock {
                Some(lock) => {
                    println!("{} {}", "✓ Acquired".green(), key.bright_yellow());
                    println!("  token: {}", lock.token());
                    println!("  lease: {:?}", lock.lease());
                },
                None => {
                    println!("{} {} is held by another owner", "✗".red(), key.bright_yellow());
                },
            }
        },
        LockCommands::Release { resource, token } => {
            let key = keys.key(&resource);
            let released = locks
                .release(&key, &LockToken::from_string(token))
                .await?;
            if released {
                println!("{} {}", "✓ Released".green(), key.bright_yellow());
            } else {
                println!("{} Not released: token does not hold {}", "✗".red(), key);
            }
        },
        LockCommands::Renew {
            resource,
            token,
            lease_ms,
        } => {
            let key = keys.key(&resource);
            let lease = lease_or_default(lease_ms);
            let renewed = locks
                .renew(&key, &LockToken::from_string(token), lease)
                .await?;
            if renewed {
                println!("{} {} for {:?}", "✓ Renewed".green(), key.bright_yellow(), lease);
            } else {
                println!("{} Not renewed: token does not hold {}", "✗".red(), key);
            }
        },
        LockCommands::Hold { resource, lease_ms } => {
            let key = keys.key(&resource);
            let lease = lease_or_default(lease_ms);
            let lock = locks
                .acquire_with_auto_renew(&key, lease)
                .await
                .with_context(|| format!("Cannot hold {}", key))?;

            println!(
                "{} {} (token {}), renewing every {:?}; Ctrl+C to release",
                "✓ Holding".green(),
                key.bright_yellow(),
                lock.token(),
                leasekit_lock::auto_renew::renew_interval(lease)
            );

            let lost = tokio::select! {
                _ = common::shutdown::wait_for_shutdown() => false,
                _ = lock.lost() => true,
            };

            if lost {
                println!("{} ownership of {} was lost", "✗".red(), key);
            } else {
                info!("Shutdown requested, releasing {}", key);
                let released = lock.release().await?;
                println!("{} released={}", "Stopped:".bright_cyan(), released);
            }
        },
        LockCommands::Inspect { resource } => {
            let key = keys.key(&resource);
            match ctx.store.get(&key).await? {
                Some(token) => {
                    let remaining = ctx.store.ttl(&key).await?;
                    println!("Key:       {}", key.bright_yellow());
                    println!("Holder:    {}", String::from_utf8_lossy(&token));
                    println!("Remaining: {:?}", remaining.unwrap_or_default());
                },
                None => println!("{} is free", key.bright_yellow()),
            }
        },
    }
    Ok(())
}
