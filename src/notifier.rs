//! Order status-change notifications.
//!
//! `OrderStatusNotifier` is an [`OrderWriteHook`]: the pre-write phase reads
//! the status currently stored for the order, the post-write phase compares
//! it with the written status and queues at most one push notification in
//! `push_outbox`. The queue row commits together with the order; delivery
//! happens later in the outbox worker, so the gateway is never on the write
//! path.
use crate::db::{self, NewPush};
use crate::model::{Order, OrderStatus};
use crate::orders::{OrderWriteHook, WriteContext};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

/// Rendering of `created_at` inside message bodies.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Created,
    StatusChanged(OrderStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

/// Decide whether a write is notifiable.
///
/// A missing previous status on an update never counts as a change.
pub fn detect_event(
    order: &Order,
    created: bool,
    previous_status: Option<OrderStatus>,
) -> Option<OrderEvent> {
    if created {
        return Some(OrderEvent::Created);
    }
    match previous_status {
        Some(previous) if previous != order.status => Some(OrderEvent::StatusChanged(order.status)),
        _ => None,
    }
}

pub fn compose(order: &Order, event: OrderEvent) -> NotificationContent {
    let number = &order.order_number;
    let date = order.created_at.format(DATE_FORMAT);
    let (title, body) = match event {
        OrderEvent::Created => (
            "Order created",
            format!("Your order {} dated {} has been created.", number, date),
        ),
        OrderEvent::StatusChanged(OrderStatus::Delivered) => (
            "Order delivered",
            format!("Your order {} dated {} was delivered successfully.", number, date),
        ),
        OrderEvent::StatusChanged(OrderStatus::Cancelled) => (
            "Order cancelled",
            format!("Your order {} dated {} was cancelled.", number, date),
        ),
        OrderEvent::StatusChanged(OrderStatus::Processing) => (
            "Order processing",
            format!("Your order {} dated {} is in progress.", number, date),
        ),
        OrderEvent::StatusChanged(OrderStatus::Shipped) => (
            "Order shipped",
            format!("Your order {} dated {} has shipped.", number, date),
        ),
        OrderEvent::StatusChanged(other @ OrderStatus::Other(_)) => (
            "Order status changed",
            format!(
                "New status for your order {} dated {}: {}.",
                number,
                date,
                other.label()
            ),
        ),
    };
    NotificationContent {
        title: title.to_string(),
        body,
    }
}

#[derive(Debug, Default, Clone)]
pub struct OrderStatusNotifier;

impl OrderStatusNotifier {
    pub fn new() -> Self {
        Self
    }

    async fn queue(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        order_id: i64,
        content: NotificationContent,
    ) {
        let user_id = order.user_id;
        match db::fetch_push_token(&mut *conn, user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(
                    user_id,
                    order_id, "push token is not available for the user; notification skipped"
                );
                return;
            }
            Err(err) => {
                warn!(
                    ?err,
                    user_id, order_id, "failed to look up push token; notification dropped"
                );
                return;
            }
        }

        let push = NewPush {
            user_id,
            order_id: Some(order_id),
            title: content.title,
            body: content.body,
            image_url: None,
        };
        match db::enqueue_push_tx(conn, &push, Utc::now()).await {
            Ok(push_id) => info!(
                push_id,
                user_id,
                order_id,
                title = %push.title,
                "order notification queued"
            ),
            Err(err) => warn!(?err, user_id, order_id, "failed to queue order notification"),
        }
    }
}

#[async_trait]
impl OrderWriteHook for OrderStatusNotifier {
    async fn before_write(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
    ) -> Result<WriteContext> {
        let previous_status = match order.id {
            Some(id) => db::fetch_current_status(&mut *conn, id).await?,
            None => None,
        };
        Ok(WriteContext { previous_status })
    }

    async fn after_write(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        created: bool,
        ctx: WriteContext,
    ) {
        let Some(order_id) = order.id else {
            return;
        };
        match detect_event(order, created, ctx.previous_status) {
            Some(event) => {
                let content = compose(order, event);
                self.queue(conn, order, order_id, content).await;
            }
            None => debug!(order_id, status = order.status.code(), "order status unchanged"),
        }
    }
}
