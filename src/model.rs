use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle status as stored in `orders.status`.
///
/// Codes outside the known set are preserved as `Other` so a row written by
/// another tool still round-trips; its label is the raw code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "i64", into = "i64")]
pub enum OrderStatus {
    #[default]
    Processing,
    Delivered,
    Cancelled,
    Shipped,
    Other(i64),
}

impl OrderStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => OrderStatus::Processing,
            1 => OrderStatus::Delivered,
            2 => OrderStatus::Cancelled,
            3 => OrderStatus::Shipped,
            other => OrderStatus::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            OrderStatus::Processing => 0,
            OrderStatus::Delivered => 1,
            OrderStatus::Cancelled => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Other(code) => *code,
        }
    }

    /// Human readable label used in notification text.
    pub fn label(&self) -> String {
        match self {
            OrderStatus::Processing => "Processing".to_string(),
            OrderStatus::Delivered => "Delivered".to_string(),
            OrderStatus::Cancelled => "Cancelled".to_string(),
            OrderStatus::Shipped => "Shipped".to_string(),
            OrderStatus::Other(code) => code.to_string(),
        }
    }
}

impl From<i64> for OrderStatus {
    fn from(code: i64) -> Self {
        OrderStatus::from_code(code)
    }
}

impl From<OrderStatus> for i64 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PaymentStatus {
    Unpaid,
    #[default]
    InProgress,
    Paid,
}

impl PaymentStatus {
    pub fn code(&self) -> i64 {
        match self {
            PaymentStatus::Unpaid => 0,
            PaymentStatus::InProgress => 1,
            PaymentStatus::Paid => 2,
        }
    }

    pub fn parse_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PaymentStatus::Unpaid),
            1 => Some(PaymentStatus::InProgress),
            2 => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    pub fcm_token: Option<String>,
    pub receive_notifications: bool,
}

impl User {
    /// Token usable for push delivery; empty strings count as absent.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// An order as seen by the write pipeline. `id` is `None` until first saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<i64>,
    pub order_number: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(user_id: i64, status: OrderStatus) -> Self {
        Self {
            id: None,
            order_number: generate_order_number(),
            user_id,
            status,
            payment_status: PaymentStatus::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_order_number(mut self, order_number: impl Into<String>) -> Self {
        self.order_number = order_number.into();
        self
    }
}

/// Ten uppercase hex characters taken from a v4 UUID.
pub fn generate_order_number() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..10].to_ascii_uppercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub image: Option<String>,
}
