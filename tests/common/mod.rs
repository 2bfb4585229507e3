#![allow(dead_code)]

use async_trait::async_trait;
use order_notifier::db;
use order_notifier::fcm::{DeliveryReceipt, PushError, PushGateway, PushMessage};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One connection, so every query sees the same in-memory database.
pub async fn setup_pool() -> db::Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub async fn make_all_due(pool: &db::Pool) {
    sqlx::query("UPDATE push_outbox SET due_at = datetime('now', '-1 seconds')")
        .execute(pool)
        .await
        .unwrap();
}

#[derive(Clone, Default)]
pub struct RecordingGateway {
    responses: Arc<Mutex<VecDeque<Result<DeliveryReceipt, PushError>>>>,
    failing_tokens: Arc<HashSet<String>>,
    calls: Arc<Mutex<Vec<PushMessage>>>,
}

impl RecordingGateway {
    pub fn with_responses(responses: Vec<Result<DeliveryReceipt, PushError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn rejecting_tokens(tokens: &[&str]) -> Self {
        Self {
            failing_tokens: Arc::new(tokens.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<PushMessage> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReceipt, PushError> {
        let n = {
            let mut calls = self.calls.lock().await;
            calls.push(message.clone());
            calls.len()
        };
        if self.failing_tokens.contains(&message.token) {
            return Err(PushError::InvalidArgument(format!(
                "The registration token is not a valid FCM registration token: {}",
                message.token
            )));
        }
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or_else(|| {
            Ok(DeliveryReceipt {
                message_id: format!("projects/demo/messages/{}", n),
            })
        })
    }
}
