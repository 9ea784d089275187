//! CLI entry point for the strm-sync daemon.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use strm_sync_core::{
    ApiClient, CycleOrchestrator, FileRegistry, RateLimiter, RetryQueue, Scheduler, StrmWriter,
};
use tracing::{debug, info};

mod cli;
mod shutdown;

use cli::Args;

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so env fallbacks see it
    let _ = dotenv::dotenv();

    // Parse CLI arguments before tracing, so --help works without logs
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    init_tracing(default_level);

    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    info!(
        api_base_url = %config.api_base_url,
        api_token = %config.masked_token(),
        media_dir = %config.media_dir.display(),
        state_dir = %config.state_dir.display(),
        interval_minutes = config.cycle_interval.as_secs() / 60,
        rate_limit_per_minute = config.rate_limit_per_minute,
        concurrency_limit = config.concurrency_limit,
        once = args.once,
        "strm-sync starting"
    );

    fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "failed to create state directory {}",
            config.state_dir.display()
        )
    })?;
    fs::create_dir_all(&config.media_dir).with_context(|| {
        format!(
            "failed to create media directory {}",
            config.media_dir.display()
        )
    })?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
    let client = ApiClient::new(
        &config.api_base_url,
        &config.api_token,
        limiter,
        config.backoff_policy(),
    )
    .context("failed to build API client")?;

    let registry = FileRegistry::load(config.registry_path());
    let queue = RetryQueue::load(config.retry_queue_path(), config.retry_policy());
    debug!(
        tracked = registry.len(),
        queued = queue.len(),
        "state loaded"
    );

    let mut orchestrator = CycleOrchestrator::new(
        Arc::new(client),
        Arc::new(StrmWriter::new(&config.media_dir)),
        config.media_filter(),
        registry,
        queue,
        config.cycle_settings(),
    );

    let cancel = shutdown::install_signal_handler();

    if args.once {
        let summary = orchestrator
            .run_cycle(&cancel)
            .await
            .context("cycle failed")?;
        info!(%summary, "single cycle complete");
        return Ok(());
    }

    let mut scheduler = Scheduler::new(
        orchestrator,
        config.cycle_interval,
        config.max_consecutive_persistence_failures,
    );
    let cycles = scheduler.run(&cancel).await?;
    info!(cycles, "strm-sync stopped");
    Ok(())
}
