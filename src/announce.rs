//! Operator bulk action: send selected announcements to every opted-in user.
use crate::db::{self, Pool};
use crate::fcm::{PushError, PushGateway, PushMessage};
use crate::model::{Announcement, User};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use reqwest::Url;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub announcement_id: i64,
    pub user_id: i64,
    pub token: String,
    pub error: PushError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedDelivery>,
}

impl BroadcastReport {
    /// Lines shown to the operator: one per failed delivery, then a summary.
    pub fn operator_messages(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .failures
            .iter()
            .map(|f| {
                format!(
                    "Failed to send notification to user with token: {} ({})",
                    f.token, f.error
                )
            })
            .collect();
        lines.push(format!(
            "Notifications sent: {} of {}",
            self.succeeded, self.attempted
        ));
        lines
    }
}

/// Absolute URL of an uploaded image, `None` when there is no image or the
/// path cannot be joined onto the media base.
pub fn image_url(media_base: &Url, image: Option<&str>) -> Option<String> {
    let path = image.map(str::trim).filter(|p| !p.is_empty())?;
    media_base
        .join(path.trim_start_matches('/'))
        .ok()
        .map(String::from)
}

pub fn announcement_message(
    announcement: &Announcement,
    token: &str,
    media_base: &Url,
) -> PushMessage {
    PushMessage::new(
        token,
        announcement.title.as_str(),
        announcement.description.as_str(),
    )
    .with_image(image_url(media_base, announcement.image.as_deref()))
    .with_data("date", announcement.date.format("%Y-%m-%d").to_string())
    .with_data("announcement_id", announcement.id.to_string())
}

/// Send each announcement to each opted-in user. Per-user failures are
/// collected in the report and never abort the batch; only a failure to load
/// the recipients is returned as an error.
#[instrument(skip_all, fields(announcements = announcements.len()))]
pub async fn broadcast(
    pool: &Pool,
    gateway: &dyn PushGateway,
    announcements: &[Announcement],
    media_base: &Url,
    concurrency: usize,
) -> Result<BroadcastReport> {
    let users = db::opted_in_users(pool).await?;
    info!(recipients = users.len(), "broadcasting announcements");

    let jobs: Vec<(&Announcement, &User)> = announcements
        .iter()
        .flat_map(|a| users.iter().map(move |u| (a, u)))
        .collect();

    let results: Vec<(&Announcement, &User, Result<(), PushError>)> = stream::iter(jobs)
        .map(|(announcement, user)| async move {
            let token = user.push_token().unwrap_or_default();
            let message = announcement_message(announcement, token, media_base);
            let res = gateway.send(&message).await.map(|_| ());
            (announcement, user, res)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = BroadcastReport::default();
    for (announcement, user, res) in results {
        report.attempted += 1;
        match res {
            Ok(()) => report.succeeded += 1,
            Err(error) => {
                let token = user.push_token().unwrap_or_default().to_string();
                warn!(
                    %error,
                    announcement_id = announcement.id,
                    user_id = user.id,
                    token = %token,
                    "announcement delivery failed"
                );
                report.failures.push(FailedDelivery {
                    announcement_id: announcement.id,
                    user_id: user.id,
                    token,
                    error,
                });
            }
        }
    }
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        "broadcast finished"
    );
    Ok(report)
}
