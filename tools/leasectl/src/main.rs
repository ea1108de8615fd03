//! leasectl - operator CLI for leasekit
//!
//! Acquire and inspect distributed locks, exercise the stampede-guarded
//! cache, and probe rate limiters against a live Redis (or an in-process
//! store with `--memory`).

mod cache;
mod context;
mod limit;
mod lock;

use crate::context::CliContext;
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::*;
use common::logging::{self, LogConfig};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "leasectl")]
#[command(about = "leasekit - distributed locks, stampede-safe caching and rate limits")]
#[command(long_about = "leasekit - distributed locks, stampede-safe caching and rate limits

Commands:
  lock        Acquire, release, renew, hold and inspect locks
  cache       Read, invalidate and stress cache entries
  limit       Probe rate limiters
  ping        Check store connectivity

Examples:
  leasectl lock acquire order:42                # Acquire and print the token
  leasectl lock hold order:42 --lease-ms 3000   # Hold with auto-renewal until Ctrl+C
  leasectl cache stampede report:daily -n 100   # 100 concurrent readers, one load
  leasectl limit check user:7 -k bucket -n 30   # 30 requests through a token bucket

Configuration is read from config/leasekit.{toml,yaml}, --config, and
LEASEKIT_* environment variables (e.g. LEASEKIT_LOCK__LEASE_MS=5000).")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis URL (overrides redis.url)
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Key namespace (overrides namespace)
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Use an in-process store instead of Redis
    #[arg(long, global = true)]
    memory: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Distributed lock operations
    Lock {
        #[command(subcommand)]
        command: lock::LockCommands,
    },

    /// Stampede-guarded cache operations
    Cache {
        #[command(subcommand)]
        command: cache::CacheCommands,
    },

    /// Rate limiter operations
    Limit {
        #[command(subcommand)]
        command: limit::LimitCommands,
    },

    /// Check that the store answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config =
        common::config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = cli.redis_url {
        config.redis.url = url;
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }

    let mut log_config = LogConfig::from_settings("leasectl", &config.logging);
    log_config.ansi = !cli.no_color;
    if cli.verbose {
        log_config.level = "debug".to_string();
    }
    logging::init_with_config(log_config)?;

    let ctx = CliContext::connect(config, cli.memory).await?;

    match cli.command {
        Commands::Lock { command } => lock::handle_command(command, &ctx).await?,
        Commands::Cache { command } => cache::handle_command(command, &ctx).await?,
        Commands::Limit { command } => limit::handle_command(command, &ctx).await?,
        Commands::Ping => {
            let started = Instant::now();
            ctx.store.ping().await?;
            println!(
                "{} {} backend answered in {:?}",
                "✓".green(),
                ctx.store.backend_name(),
                started.elapsed()
            );
        },
    }

    Ok(())
}
