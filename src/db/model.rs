//! Database view models used by repositories.
//!
//! Keep these structs focused on the data written or returned by queries.
//! Business logic lives in `notifier` and `outbox`.

/// A push notification waiting in `push_outbox`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPush {
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
}

/// Outbox row joined with the recipient's current push token.
#[derive(Debug, Clone)]
pub struct PushForDelivery {
    pub id: i64,
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub attempt: i32,
    pub token: Option<String>,
}
