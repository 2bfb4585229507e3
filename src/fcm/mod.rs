//! Push gateway: the `PushGateway` seam and its Firebase Cloud Messaging
//! (HTTP v1) implementation.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fcm::model::{ErrorEnvelope, SendResponse};

pub mod model;

const FCM_API_BASE: &str = "https://fcm.googleapis.com/";

/// A single notification addressed to one device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(
        token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            title: title.into(),
            body: body.into(),
            image_url: None,
            data: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Malformed token or payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The token is no longer valid for this app.
    #[error("token is not registered: {0}")]
    Unregistered(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network failure, timeout or an unexpected gateway response.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl PushError {
    /// Retrying the same message cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::InvalidArgument(_) | PushError::Unregistered(_))
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReceipt, PushError>;
}

#[derive(Clone)]
pub struct FcmClient {
    http: Client,
    base_url: Url,
    project_id: String,
    access_token: String,
}

impl fmt::Debug for FcmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FcmClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl FcmClient {
    pub fn new(project_id: String, access_token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(FCM_API_BASE).context("invalid default FCM URL")?;
        Self::with_base_url(project_id, access_token, base_url, timeout)
    }

    pub fn with_base_url(
        project_id: String,
        access_token: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("order-notifier/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            base_url,
            project_id,
            access_token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.fcm.endpoint).context("invalid fcm.endpoint")?;
        Self::with_base_url(
            cfg.fcm.project_id.clone(),
            cfg.fcm.access_token.clone(),
            base_url,
            Duration::from_secs(cfg.fcm.timeout_seconds),
        )
    }

    pub fn build_request(&self, message: &PushMessage) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1/projects/{}/messages:send", self.project_id))
            .context("invalid FCM base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(&build_message_body(message))
            .build()
            .context("failed to build FCM request")
    }

    async fn execute_send(&self, message: &PushMessage) -> Result<DeliveryReceipt, PushError> {
        let request = self
            .build_request(message)
            .map_err(|err| PushError::InvalidArgument(format!("{:#}", err)))?;
        debug!(url = %request.url(), title = %message.title, "sending FCM message");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| PushError::Transport(format!("failed to reach FCM: {}", err)))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| PushError::Transport(format!("failed to read FCM response: {}", err)))?;

        if !status.is_success() {
            warn!(%status, body = %body, "FCM rejected message");
            return Err(classify_error(status, &body));
        }

        let payload: SendResponse = serde_json::from_str(&body)
            .map_err(|err| PushError::Transport(format!("invalid FCM response JSON: {}", err)))?;
        info!(message_id = %payload.name, "FCM accepted message");
        Ok(DeliveryReceipt {
            message_id: payload.name,
        })
    }
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReceipt, PushError> {
        self.execute_send(message).await
    }
}

/// JSON body of a `messages:send` request.
pub fn build_message_body(message: &PushMessage) -> Value {
    let mut notification = Map::new();
    notification.insert("title".into(), Value::String(message.title.clone()));
    notification.insert("body".into(), Value::String(message.body.clone()));
    if let Some(image) = message.image_url.as_deref().filter(|u| !u.is_empty()) {
        notification.insert("image".into(), Value::String(image.to_string()));
    }

    let mut inner = Map::new();
    inner.insert("token".into(), Value::String(message.token.clone()));
    inner.insert("notification".into(), Value::Object(notification));
    if !message.data.is_empty() {
        inner.insert("data".into(), json!(message.data));
    }

    json!({ "message": Value::Object(inner) })
}

/// Map a non-success FCM response onto the error taxonomy.
pub fn classify_error(status: StatusCode, body: &str) -> PushError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("fcm error {}: {}", status, body));

    match parsed.as_ref().and_then(|e| e.error.error_code()) {
        Some("INVALID_ARGUMENT") => return PushError::InvalidArgument(message),
        Some("UNREGISTERED") | Some("NOT_FOUND") => return PushError::Unregistered(message),
        Some("QUOTA_EXCEEDED") | Some("RESOURCE_EXHAUSTED") => {
            return PushError::RateLimited(message)
        }
        _ => {}
    }

    match status {
        StatusCode::BAD_REQUEST => PushError::InvalidArgument(message),
        StatusCode::NOT_FOUND => PushError::Unregistered(message),
        StatusCode::TOO_MANY_REQUESTS => PushError::RateLimited(message),
        _ => PushError::Transport(message),
    }
}
