use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use order_notifier::config;
use order_notifier::db;
use order_notifier::fcm::FcmClient;
use order_notifier::outbox::{self, RetryPolicy};

#[derive(Debug, Parser)]
#[command(author, version, about = "Deliver queued order notifications until interrupted")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let gateway = FcmClient::from_config(&cfg)?;
    let policy = RetryPolicy::from_config(&cfg);
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);

    // Single delivery worker; pushes go out in commit order.
    let worker_pool = pool.clone();
    let worker = tokio::spawn(async move {
        loop {
            match outbox::process_next_task(&worker_pool, &gateway, &policy).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "outbox worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(pending = db::count_pending_pushes(&pool).await?, "delivery worker started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    worker.abort();
    pool.close().await;
    Ok(())
}
