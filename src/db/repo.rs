use super::model::{NewPush, PushForDelivery};
use crate::model::{Announcement, Order, OrderStatus, PaymentStatus, User};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL plus FULL sync; the outbox must survive a crash right after commit.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(?err, path = %parent.display(), "failed to create database directory");
            }
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        phone_number: row.try_get("phone_number")?,
        name: row.try_get("name")?,
        fcm_token: row.try_get("fcm_token")?,
        receive_notifications: row.try_get("receive_notifications")?,
    })
}

#[instrument(skip_all)]
pub async fn create_user(
    pool: &Pool,
    phone_number: &str,
    name: Option<&str>,
    fcm_token: Option<&str>,
) -> Result<i64> {
    if phone_number.trim().is_empty() {
        return Err(anyhow!("the phone number must be set"));
    }
    let rec = sqlx::query(
        "INSERT INTO users (phone_number, name, fcm_token) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(phone_number)
    .bind(name)
    .bind(fcm_token)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create user {}", phone_number))?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn fetch_user(pool: &Pool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, phone_number, name, fcm_token, receive_notifications FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn set_fcm_token(pool: &Pool, user_id: i64, token: Option<&str>) -> Result<()> {
    let res = sqlx::query("UPDATE users SET fcm_token = ? WHERE id = ?")
        .bind(token)
        .bind(user_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("user {} not found", user_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_receive_notifications(pool: &Pool, user_id: i64, enabled: bool) -> Result<()> {
    let res = sqlx::query("UPDATE users SET receive_notifications = ? WHERE id = ?")
        .bind(enabled)
        .bind(user_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("user {} not found", user_id));
    }
    Ok(())
}

/// Current push token of a user, `None` when unset or blank.
pub async fn fetch_push_token<'e, E>(executor: E, user_id: i64) -> Result<Option<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let token: Option<Option<String>> =
        sqlx::query_scalar("SELECT fcm_token FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(executor)
            .await?;
    Ok(token
        .flatten()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}

/// Users that opted into announcements and have a usable token.
#[instrument(skip_all)]
pub async fn opted_in_users(pool: &Pool) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT id, phone_number, name, fcm_token, receive_notifications FROM users \
         WHERE receive_notifications = 1 AND fcm_token IS NOT NULL AND TRIM(fcm_token) <> '' \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(user_from_row).collect()
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let payment_code: i64 = row.try_get("payment_status")?;
    Ok(Order {
        id: Some(row.try_get("id")?),
        order_number: row.try_get("order_number")?,
        user_id: row.try_get("user_id")?,
        status: OrderStatus::from_code(row.try_get("status")?),
        payment_status: PaymentStatus::parse_code(payment_code)
            .ok_or_else(|| anyhow!("unknown payment status {}", payment_code))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[instrument(skip_all)]
pub async fn fetch_order(pool: &Pool, order_id: i64) -> Result<Option<Order>> {
    let row = sqlx::query(
        "SELECT id, order_number, user_id, status, payment_status, created_at FROM orders WHERE id = ?",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(order_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_order_by_number(pool: &Pool, order_number: &str) -> Result<Option<Order>> {
    let row = sqlx::query(
        "SELECT id, order_number, user_id, status, payment_status, created_at FROM orders WHERE order_number = ?",
    )
    .bind(order_number)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(order_from_row).transpose()
}

/// Status currently persisted for an order, `None` if the row does not exist.
pub async fn fetch_current_status<'e, E>(executor: E, order_id: i64) -> Result<Option<OrderStatus>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let code: Option<i64> = sqlx::query_scalar("SELECT status FROM orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(executor)
        .await?;
    Ok(code.map(OrderStatus::from_code))
}

/// Take the SQLite write lock for an order row before reading it, so the
/// status read and the update cannot interleave with another writer.
/// Returns false when the row does not exist.
pub async fn claim_order_row(conn: &mut SqliteConnection, order_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE orders SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO orders (order_number, user_id, status, payment_status, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&order.order_number)
    .bind(order.user_id)
    .bind(order.status.code())
    .bind(order.payment_status.code())
    .bind(order.created_at)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to insert order {}", order.order_number))?;
    Ok(rec.get("id"))
}

pub async fn update_order(conn: &mut SqliteConnection, order_id: i64, order: &Order) -> Result<()> {
    sqlx::query(
        "UPDATE orders SET order_number = ?, user_id = ?, status = ?, payment_status = ?, \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(&order.order_number)
    .bind(order.user_id)
    .bind(order.status.code())
    .bind(order.payment_status.code())
    .bind(order_id)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to update order {}", order_id))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Announcements
// ---------------------------------------------------------------------------

fn announcement_from_row(row: &SqliteRow) -> Result<Announcement> {
    Ok(Announcement {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        date: row.try_get::<NaiveDate, _>("date")?,
        image: row.try_get("image")?,
    })
}

#[instrument(skip_all)]
pub async fn create_announcement(
    pool: &Pool,
    title: &str,
    description: &str,
    date: NaiveDate,
    image: Option<&str>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO announcements (title, description, date, image) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(title)
    .bind(description)
    .bind(date)
    .bind(image)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

/// Announcements with the given ids, ordered by id. Unknown ids are skipped.
#[instrument(skip_all)]
pub async fn fetch_announcements(pool: &Pool, ids: &[i64]) -> Result<Vec<Announcement>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, title, description, date, image FROM announcements WHERE id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(announcement_from_row).collect()
}

#[instrument(skip_all)]
pub async fn all_announcements(pool: &Pool) -> Result<Vec<Announcement>> {
    let rows =
        sqlx::query("SELECT id, title, description, date, image FROM announcements ORDER BY id")
            .fetch_all(pool)
            .await?;
    rows.iter().map(announcement_from_row).collect()
}

// ---------------------------------------------------------------------------
// Push outbox
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn enqueue_push(pool: &Pool, push: &NewPush, due_at: DateTime<Utc>) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_push_tx(&mut tx, push, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn enqueue_push_tx(
    conn: &mut SqliteConnection,
    push: &NewPush,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO push_outbox (user_id, order_id, title, body, image_url, attempt, due_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(push.user_id)
    .bind(push.order_id)
    .bind(&push.title)
    .bind(&push.body)
    .bind(&push.image_url)
    .bind(due_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_push(pool: &Pool) -> Result<Option<PushForDelivery>> {
    let row = sqlx::query(
        "SELECT p.id, p.user_id, p.order_id, p.title, p.body, p.image_url, p.attempt, u.fcm_token \
         FROM push_outbox p LEFT JOIN users u ON u.id = p.user_id \
         WHERE datetime(p.due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(p.due_at) ASC, p.id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(PushForDelivery {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        order_id: row.try_get("order_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        image_url: row.try_get("image_url")?,
        attempt: row.try_get("attempt")?,
        token: row
            .try_get::<Option<String>, _>("fcm_token")?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    }))
}

#[instrument(skip_all)]
pub async fn delete_push(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM push_outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` (no cap when <= 0).
pub fn backoff_delay_secs(attempt: i32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    }
}

#[instrument(skip_all)]
pub async fn backoff_push_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
) -> Result<()> {
    let secs = backoff_delay_secs(attempt, max_cap_secs);
    sqlx::query(
        "UPDATE push_outbox SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending_pushes(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay_secs(0, 300), 5);
        assert_eq!(backoff_delay_secs(3, 300), 40);
        assert_eq!(backoff_delay_secs(9, 300), 300);
        assert_eq!(backoff_delay_secs(20, 0), 5 * 1024);
    }

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn file_urls_are_normalized() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("orders.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let rebuilt = prepare_sqlite_url(&url);
        assert_eq!(rebuilt, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(td.path().join("nested").exists());
    }

    #[test]
    fn unwritable_parent_still_yields_url() {
        let td = tempfile::tempdir().unwrap();
        let blocker = td.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("orders.db");
        let rebuilt = prepare_sqlite_url(&format!("sqlite://{}", path.display()));
        assert_eq!(rebuilt, format!("sqlite://{}", path.display()));
        assert!(blocker.is_file());
    }

    #[tokio::test]
    async fn users_tokens_and_opt_in() {
        let pool = setup_pool().await;
        let a = create_user(&pool, "+996700000001", Some("Aida"), Some("tok-a"))
            .await
            .unwrap();
        let b = create_user(&pool, "+996700000002", None, Some(""))
            .await
            .unwrap();
        let c = create_user(&pool, "+996700000003", None, Some("tok-c"))
            .await
            .unwrap();
        set_receive_notifications(&pool, c, false).await.unwrap();

        assert_eq!(fetch_push_token(&pool, a).await.unwrap().as_deref(), Some("tok-a"));
        assert!(fetch_push_token(&pool, b).await.unwrap().is_none());

        let opted: Vec<i64> = opted_in_users(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(opted, vec![a]);

        let muted = fetch_user(&pool, c).await.unwrap().unwrap();
        assert!(!muted.receive_notifications);
        assert_eq!(muted.push_token(), Some("tok-c"));
        assert!(fetch_user(&pool, 999).await.unwrap().is_none());

        set_fcm_token(&pool, b, Some("tok-b")).await.unwrap();
        assert_eq!(opted_in_users(&pool).await.unwrap().len(), 2);

        assert!(set_fcm_token(&pool, 999, None).await.is_err());
        assert!(create_user(&pool, " ", None, None).await.is_err());
    }

    #[tokio::test]
    async fn orders_insert_update_and_claim() {
        let pool = setup_pool().await;
        let uid = create_user(&pool, "+996700000010", None, None).await.unwrap();
        let order = Order::new(uid, OrderStatus::Processing).with_order_number("A-1");

        let mut tx = pool.begin().await.unwrap();
        let id = insert_order(&mut tx, &order).await.unwrap();
        assert!(claim_order_row(&mut tx, id).await.unwrap());
        assert!(!claim_order_row(&mut tx, id + 100).await.unwrap());
        let mut changed = order.clone();
        changed.status = OrderStatus::Shipped;
        update_order(&mut tx, id, &changed).await.unwrap();
        assert_eq!(
            fetch_current_status(&mut *tx, id).await.unwrap(),
            Some(OrderStatus::Shipped)
        );
        tx.commit().await.unwrap();

        let stored = fetch_order(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.order_number, "A-1");
        assert_eq!(stored.status, OrderStatus::Shipped);
        assert_eq!(stored.payment_status, PaymentStatus::InProgress);
        assert_eq!(stored.created_at.timestamp(), order.created_at.timestamp());
        assert!(fetch_order_by_number(&pool, "A-1").await.unwrap().is_some());
        assert!(fetch_current_status(&pool, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn announcements_by_ids() {
        let pool = setup_pool().await;
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let a = create_announcement(&pool, "Sale", "All -20%", date, Some("ads/sale.png"))
            .await
            .unwrap();
        let b = create_announcement(&pool, "New", "Arrivals", date, None)
            .await
            .unwrap();

        let picked = fetch_announcements(&pool, &[b, 4242]).await.unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].title, "New");
        assert!(fetch_announcements(&pool, &[]).await.unwrap().is_empty());

        let all = all_announcements(&pool).await.unwrap();
        assert_eq!(all.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(all[0].image.as_deref(), Some("ads/sale.png"));
        assert_eq!(all[0].date, date);
    }

    #[tokio::test]
    async fn outbox_enqueue_backoff_delete() {
        let pool = setup_pool().await;
        let uid = create_user(&pool, "+996700000020", None, Some("tok"))
            .await
            .unwrap();
        let push = NewPush {
            user_id: uid,
            order_id: None,
            title: "t".into(),
            body: "b".into(),
            image_url: None,
        };
        let id = enqueue_push(&pool, &push, Utc::now()).await.unwrap();
        let due = next_due_push(&pool).await.unwrap().unwrap();
        assert_eq!(due.id, id);
        assert_eq!(due.token.as_deref(), Some("tok"));
        assert_eq!(due.attempt, 0);

        backoff_push_with_cap(&pool, id, due.attempt, 60).await.unwrap();
        assert!(next_due_push(&pool).await.unwrap().is_none());
        assert_eq!(count_pending_pushes(&pool).await.unwrap(), 1);

        delete_push(&pool, id).await.unwrap();
        assert_eq!(count_pending_pushes(&pool).await.unwrap(), 0);
    }
}
