use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use order_notifier::config;
use order_notifier::db;
use order_notifier::model::{Order, OrderStatus};
use order_notifier::notifier::OrderStatusNotifier;
use order_notifier::orders::OrderStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Operator commands for users, orders and announcements")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a user
    AddUser {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Set or clear (when --token is omitted) a user's push token
    SetToken {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        token: Option<String>,
    },
    /// Turn announcement delivery on or off for a user
    Notifications {
        #[arg(long)]
        user_id: i64,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Create an order (notifies the owner)
    CreateOrder {
        #[arg(long)]
        user_id: i64,
        /// Status code: 0 processing, 1 delivered, 2 cancelled, 3 shipped
        #[arg(long, default_value = "0")]
        status: i64,
        /// Order number; generated when omitted
        #[arg(long)]
        number: Option<String>,
    },
    /// Change the status of an order (notifies the owner on change)
    SetStatus {
        #[arg(long, conflicts_with = "number", required_unless_present = "number")]
        order_id: Option<i64>,
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        status: i64,
    },
    /// Store an announcement for the `announce` tool
    AddAnnouncement {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        /// Image path relative to media.base_url
        #[arg(long)]
        image: Option<String>,
    },
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
    let store = OrderStore::new(pool.clone()).with_hook(Arc::new(OrderStatusNotifier::new()));

    match args.command {
        Command::AddUser { phone, name, token } => {
            let id = db::create_user(&pool, &phone, name.as_deref(), token.as_deref()).await?;
            println!("user {}", id);
        }
        Command::SetToken { user_id, token } => {
            db::set_fcm_token(&pool, user_id, token.as_deref()).await?;
            info!(user_id, cleared = token.is_none(), "push token updated");
        }
        Command::Notifications { user_id, enabled } => {
            db::set_receive_notifications(&pool, user_id, enabled).await?;
            info!(user_id, enabled, "notification preference updated");
        }
        Command::CreateOrder {
            user_id,
            status,
            number,
        } => {
            let mut order = Order::new(user_id, OrderStatus::from_code(status));
            if let Some(number) = number {
                order = order.with_order_number(number);
            }
            let saved = store.save(&mut order).await?;
            println!("order {} ({})", saved.id, order.order_number);
        }
        Command::SetStatus {
            order_id,
            number,
            status,
        } => {
            let order_id = match (order_id, number) {
                (Some(id), _) => id,
                (None, Some(number)) => db::fetch_order_by_number(&pool, &number)
                    .await?
                    .and_then(|o| o.id)
                    .ok_or_else(|| anyhow!("order {} not found", number))?,
                (None, None) => return Err(anyhow!("either --order-id or --number is required")),
            };
            let order = store
                .set_status(order_id, OrderStatus::from_code(status))
                .await?;
            println!("order {} is now {}", order.order_number, order.status.label());
        }
        Command::AddAnnouncement {
            title,
            description,
            date,
            image,
        } => {
            let id =
                db::create_announcement(&pool, &title, &description, date, image.as_deref()).await?;
            println!("announcement {}", id);
        }
    }

    pool.close().await;
    Ok(())
}
