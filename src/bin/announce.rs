use anyhow::{anyhow, Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tracing::info;

use order_notifier::announce;
use order_notifier::config;
use order_notifier::db;
use order_notifier::fcm::FcmClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Send the selected announcements to every opted-in user"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Announcement id to send (repeatable)
    #[arg(long = "id", required_unless_present = "all")]
    ids: Vec<i64>,

    /// Send every stored announcement
    #[arg(long, conflicts_with = "ids")]
    all: bool,

    /// Concurrent requests to the push gateway
    #[arg(long, default_value = "8")]
    concurrency: usize,
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

    let announcements = if args.all {
        db::all_announcements(&pool).await?
    } else {
        db::fetch_announcements(&pool, &args.ids).await?
    };
    if announcements.is_empty() {
        return Err(anyhow!("no matching announcements"));
    }

    let gateway = FcmClient::from_config(&cfg)?;
    let media_base = Url::parse(&cfg.media.base_url).context("invalid media.base_url")?;
    info!(count = announcements.len(), "sending announcements");

    let report =
        announce::broadcast(&pool, &gateway, &announcements, &media_base, args.concurrency).await?;
    for line in report.operator_messages() {
        println!("{}", line);
    }

    pool.close().await;
    Ok(())
}
