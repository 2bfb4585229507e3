use crate::db;
use crate::fcm::{PushGateway, PushMessage};
use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts (including the first) before a transient failure is dropped.
    pub max_attempts: i32,
    pub max_backoff_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_backoff_secs: 300,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            max_attempts: i32::try_from(cfg.app.max_attempts).unwrap_or(i32::MAX),
            max_backoff_secs: i64::try_from(cfg.app.max_backoff_seconds).unwrap_or(i64::MAX),
        }
    }
}

/// Deliver the next due push, if any. Returns whether a row was handled.
///
/// Gateway errors never escape: permanent ones drop the row, transient ones
/// reschedule it until `max_attempts` is reached. Only database errors are
/// returned.
#[instrument(skip_all)]
pub async fn process_next_task(
    pool: &SqlitePool,
    gateway: &dyn PushGateway,
    policy: &RetryPolicy,
) -> Result<bool> {
    let Some(task) = db::next_due_push(pool).await? else {
        return Ok(false);
    };
    let (id, user_id, order_id, attempt) = (task.id, task.user_id, task.order_id, task.attempt);

    let Some(token) = task.token else {
        debug!(
            id,
            user_id,
            ?order_id,
            "push token is not available for the user; dropping notification"
        );
        db::delete_push(pool, id).await?;
        return Ok(true);
    };

    let message = PushMessage::new(token.as_str(), task.title.as_str(), task.body.as_str())
        .with_image(task.image_url.clone());

    match gateway.send(&message).await {
        Ok(receipt) => {
            db::delete_push(pool, id).await?;
            info!(id, user_id, ?order_id, message_id = %receipt.message_id, "push delivered");
        }
        Err(err) if err.is_permanent() => {
            warn!(
                %err,
                id,
                user_id,
                ?order_id,
                token = %token,
                "push rejected; dropping notification"
            );
            db::delete_push(pool, id).await?;
        }
        Err(err) if attempt + 1 >= policy.max_attempts => {
            error!(
                %err,
                id,
                user_id,
                ?order_id,
                token = %token,
                attempt,
                "push failed; giving up"
            );
            db::delete_push(pool, id).await?;
        }
        Err(err) => {
            warn!(
                %err,
                id,
                user_id,
                ?order_id,
                token = %token,
                attempt,
                "push failed; backoff"
            );
            db::backoff_push_with_cap(pool, id, attempt, policy.max_backoff_secs).await?;
        }
    }
    Ok(true)
}

/// Drain every push that is currently due. Returns how many rows were handled.
pub async fn drain_due(
    pool: &SqlitePool,
    gateway: &dyn PushGateway,
    policy: &RetryPolicy,
) -> Result<usize> {
    let mut handled = 0;
    while process_next_task(pool, gateway, policy).await? {
        handled += 1;
    }
    Ok(handled)
}
