//! Rate limiter probes

use crate::context::CliContext;
use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use colored::*;
use leasekit_ratelimit::{
    FixedWindowLimiter, RateLimiter, SlidingWindowLimiter, TokenBucketLimiter,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LimiterKind {
    Fixed,
    Sliding,
    Bucket,
}

#[derive(Subcommand)]
pub enum LimitCommands {
    /// Send requests for ID through a limiter and print each decision
    Check {
        /// Caller identity (user, IP, API key)
        id: String,
        #[arg(short, long, value_enum, default_value = "sliding")]
        kind: LimiterKind,
        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "1")]
        requests: u32,
        /// Print decisions as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn build_limiter(kind: LimiterKind, ctx: &CliContext) -> Result<Box<dyn RateLimiter>> {
    let settings = &ctx.config.rate_limit;
    let store = ctx.store.clone();
    let keys = ctx.keys();
    let limiter: Box<dyn RateLimiter> = match kind {
        LimiterKind::Fixed => Box::new(
            FixedWindowLimiter::new(store, settings.limit, settings.window())?.with_keys(keys),
        ),
        LimiterKind::Sliding => Box::new(
            SlidingWindowLimiter::new(store, settings.limit, settings.window())?.with_keys(keys),
        ),
        LimiterKind::Bucket => Box::new(
            TokenBucketLimiter::new(store, settings.capacity, settings.refill_per_sec)?
                .with_keys(keys),
        ),
    };
    Ok(limiter)
}

pub async fn handle_command(cmd: LimitCommands, ctx: &CliContext) -> Result<()> {
    match cmd {
        LimitCommands::Check {
            id,
            kind,
            requests,
            json,
        } => {
            let limiter = build_limiter(kind, ctx)?;
            let mut admitted = 0u32;

            for i in 1..=requests {
                let decision = limiter.check(&id).await?;
                if decision.allowed {
                    admitted += 1;
                }

                if json {
                    println!("{}", serde_json::to_string(&decision)?);
                } else if decision.allowed {
                    println!("{:>4} {} remaining={}", i, "ALLOW".green(), decision.remaining);
                } else {
                    println!(
                        "{:>4} {} retry_after={:?}",
                        i,
                        "DENY".red(),
                        decision.retry_after.unwrap_or_default()
                    );
                }
            }

            if !json {
                println!(
                    "{} {}/{} admitted by {} limiter",
                    "Summary:".bright_cyan(),
                    admitted,
                    requests,
                    limiter.name()
                );
            }
        },
    }
    Ok(())
}
