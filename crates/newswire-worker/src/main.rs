use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use newswire_core::queue::WorkQueue;
use newswire_core::retry::RetryPolicy;
use newswire_core::worker::{TracingWorkerReporter, Worker, WorkerConfig};
use newswire_db::{DatabaseConfig, PgStore};
use newswire_mq::{RedisBus, RedisConfig, RedisQueue};
use newswire_scraper::HttpScraper;

#[derive(Parser)]
#[command(name = "newswire-worker", version, about = "Article scrape worker")]
struct Cli {
    /// Number of concurrent worker loops in this process.
    #[arg(short, long, env = "WORKER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Worker id prefix; each loop appends its index.
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Retry budget per article.
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value_t = 3)]
    max_retries: u32,

    /// Scrape deadline in seconds.
    #[arg(long, env = "SCRAPE_TIMEOUT", default_value_t = 30)]
    scrape_timeout: u64,

    /// Blocking-pop timeout in seconds.
    #[arg(long, env = "WORKER_POLL_INTERVAL", default_value_t = 1)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newswire=info".parse()?))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let worker_id = cli
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let store = PgStore::connect(&DatabaseConfig::from_env()?).await?;
    store.migrate().await?;

    let redis = RedisConfig::from_env()?;
    let queue = RedisQueue::new(&redis.url)?;
    let bus = RedisBus::new(&redis.url)?;

    let scrape_timeout = Duration::from_secs(cli.scrape_timeout);
    let scraper = HttpScraper::new(scrape_timeout).context("Failed to build HTTP client")?;

    let backlog = queue.depth().await.unwrap_or(0);
    tracing::info!(%worker_id, concurrency = cli.concurrency, %backlog, "Starting workers");

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(cli.concurrency);
    for i in 0..cli.concurrency {
        let config = WorkerConfig::default()
            .with_worker_id(format!("{worker_id}-{i}"))
            .with_poll_timeout(Duration::from_secs(cli.poll_interval))
            .with_scrape_timeout(scrape_timeout)
            .with_retry(RetryPolicy {
                max_attempts: cli.max_retries,
                ..RetryPolicy::default()
            });

        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            bus.clone(),
            scraper.clone(),
            config,
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker.run(cancel, &TracingWorkerReporter).await;
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Worker task did not shut down cleanly");
        }
    }

    tracing::info!("All workers stopped");
    Ok(())
}
