mod common;

use chrono::NaiveDate;
use common::{setup_pool, RecordingGateway};
use order_notifier::announce::broadcast;
use order_notifier::db;
use reqwest::Url;
use std::collections::HashSet;

#[tokio::test]
async fn one_bad_token_does_not_abort_the_batch() {
    let pool = setup_pool().await;
    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let mut ids = Vec::new();
    for title in ["Sale", "New arrivals", "Holiday hours"] {
        ids.push(
            db::create_announcement(&pool, title, "details", date, Some("ads/banner.png"))
                .await
                .unwrap(),
        );
    }

    db::create_user(&pool, "+996700000001", None, Some("tok-1"))
        .await
        .unwrap();
    db::create_user(&pool, "+996700000002", None, Some("tok-2"))
        .await
        .unwrap();
    let bad = db::create_user(&pool, "+996700000003", None, Some("bad-token"))
        .await
        .unwrap();
    // Not opted in: no token, or notifications disabled.
    db::create_user(&pool, "+996700000004", None, None)
        .await
        .unwrap();
    let muted = db::create_user(&pool, "+996700000005", None, Some("tok-5"))
        .await
        .unwrap();
    db::set_receive_notifications(&pool, muted, false)
        .await
        .unwrap();

    let announcements = db::fetch_announcements(&pool, &ids).await.unwrap();
    let gateway = RecordingGateway::rejecting_tokens(&["bad-token"]);
    let media = Url::parse("https://shop.example.com/media/").unwrap();

    let report = broadcast(&pool, &gateway, &announcements, &media, 4)
        .await
        .unwrap();

    assert_eq!(report.attempted, 9);
    assert_eq!(report.succeeded, 6);
    assert_eq!(report.failures.len(), 3);
    assert!(report
        .failures
        .iter()
        .all(|f| f.token == "bad-token" && f.user_id == bad));
    let failed_announcements: HashSet<i64> =
        report.failures.iter().map(|f| f.announcement_id).collect();
    assert_eq!(failed_announcements, ids.iter().copied().collect());

    let lines = report.operator_messages();
    assert_eq!(
        lines.iter().filter(|l| l.contains("bad-token")).count(),
        3
    );

    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 9);
    assert!(calls.iter().all(|m| m.token != "tok-5"));
    assert!(calls.iter().all(|m| m.image_url.as_deref()
        == Some("https://shop.example.com/media/ads/banner.png")));
}

#[tokio::test]
async fn no_recipients_means_no_attempts() {
    let pool = setup_pool().await;
    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let id = db::create_announcement(&pool, "Sale", "details", date, None)
        .await
        .unwrap();
    let announcements = db::fetch_announcements(&pool, &[id]).await.unwrap();
    let gateway = RecordingGateway::default();
    let media = Url::parse("https://shop.example.com/media/").unwrap();

    let report = broadcast(&pool, &gateway, &announcements, &media, 1)
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);
    assert!(report.failures.is_empty());
    assert_eq!(
        report.operator_messages(),
        vec!["Notifications sent: 0 of 0".to_string()]
    );
}
