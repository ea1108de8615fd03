//! Cache commands

use crate::context::CliContext;
use anyhow::{Context as _, Result};
use clap::Subcommand;
use colored::*;
use leasekit_cache::StampedeCache;
use leasekit_lock::LockManager;
use leasekit_store::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Read a cache entry
    #[command(about = "Read a cache entry; with --load, fill a miss through the stampede guard")]
    Get {
        key: String,
        /// Value to populate on a miss
        #[arg(long)]
        load: Option<String>,
    },

    /// Delete a cache entry
    Invalidate {
        key: String,
    },

    /// Fire concurrent readers at one key and report how many loads ran
    #[command(about = "Simulate a cache stampede against the configured store")]
    Stampede {
        key: String,
        /// Concurrent callers
        #[arg(short = 'n', long, default_value = "50")]
        callers: usize,
        /// Simulated loader latency in milliseconds
        #[arg(long, default_value = "50")]
        loader_ms: u64,
    },
}

pub async fn handle_command(cmd: CacheCommands, ctx: &CliContext) -> Result<()> {
    let locks = LockManager::new(ctx.store.clone());
    let cache = StampedeCache::new(locks, ctx.config.cache_config())
        .context("Invalid cache configuration")?;

    match cmd {
        CacheCommands::Get { key, load } => {
            let value = match load {
                Some(value) => {
                    let cancel = common::shutdown::cancel_on_shutdown();
                    let result = cache
                        .get(&key, || async move { Ok(Bytes::from(value)) }, &cancel)
                        .await;
                    cancel.cancel();
                    Some(result?)
                },
                None => cache.peek(&key).await?,
            };

            match value {
                Some(bytes) => {
                    println!("Key:   {}", cache.entry_key(&key).bright_yellow());
                    println!("Value: {}", String::from_utf8_lossy(&bytes));
                    if let Some(ttl) = ctx.store.ttl(&cache.entry_key(&key)).await? {
                        println!("TTL:   {:?}", ttl);
                    }
                },
                None => println!("{} Key '{}' not cached", "⚠".yellow(), key),
            }
        },
        CacheCommands::Invalidate { key } => {
            if cache.invalidate(&key).await? {
                println!("{} {}", "✓ Invalidated".green(), key.bright_yellow());
            } else {
                println!("{} Key '{}' was not cached", "⚠".yellow(), key);
            }
        },
        CacheCommands::Stampede {
            key,
            callers,
            loader_ms,
        } => {
            run_stampede(&cache, &key, callers, Duration::from_millis(loader_ms)).await?;
        },
    }
    Ok(())
}

async fn run_stampede<S>(
    cache: &StampedeCache<S>,
    key: &str,
    callers: usize,
    loader_delay: Duration,
) -> Result<()>
where
    S: leasekit_store::KvStore + ?Sized + 'static,
{
    println!(
        "{} {} callers on {} (loader {:?})",
        "Stampede:".bright_cyan(),
        callers,
        key.bright_yellow(),
        loader_delay
    );

    cache.invalidate(key).await?;
    let loader_calls = Arc::new(AtomicUsize::new(0));
    let cancel = common::shutdown::cancel_on_shutdown();
    let started = Instant::now();

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let cache = cache.clone();
            let key = key.to_string();
            let loader_calls = Arc::clone(&loader_calls);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cache
                    .get(
                        &key,
                        || async move {
                            tokio::time::sleep(loader_delay).await;
                            let n = loader_calls.fetch_add(1, Ordering::SeqCst) + 1;
                            Ok(Bytes::from(format!("load-{}", n)))
                        },
                        &cancel,
                    )
                    .await
            })
        })
        .collect();

    let mut ok = 0usize;
    let mut failed = 0usize;
    for result in futures::future::join_all(handles).await {
        match result.context("Caller task panicked")? {
            Ok(_) => ok += 1,
            Err(e) => {
                failed += 1;
                tracing::debug!("Caller failed: {}", e);
            },
        }
    }
    cancel.cancel();

    println!("  elapsed:      {:?}", started.elapsed());
    println!("  succeeded:    {}", ok.to_string().green());
    println!("  failed:       {}", failed.to_string().red());
    println!(
        "  loader calls: {}",
        loader_calls.load(Ordering::SeqCst).to_string().bright_yellow()
    );
    println!("  stats:        {}", serde_json::to_string(&cache.stats())?);
    Ok(())
}
