//! Integration tests for single-document fetches and the ping probe

use chrono::{DateTime, Utc};
use waymark_core::domain::newtypes::ReminderId;
use waymark_core::domain::SyncState;
use waymark_core::ports::remote_store::IRemoteStore;
use waymark_remote::RemoteError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_fetch_returns_the_document() {
    let (server, store) = common::setup_remote_store().await;
    let id = ReminderId::new();

    let doc = common::reminder_doc_json(
        &id.to_string(),
        "Water the plants",
        4,
        "active",
        Some(common::geofence_json(52.52, 13.405, 120.0)),
    );
    Mock::given(method("GET"))
        .and(path(format!("/v1/reminders/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(&server)
        .await;

    let change = store
        .fetch(&id)
        .await
        .expect("fetch failed")
        .expect("document expected");

    assert_eq!(*change.reminder.id(), id);
    assert_eq!(change.reminder.title(), "Water the plants");
    assert_eq!(change.reminder.revision().value(), 4);
    assert_eq!(change.reminder.sync_state(), SyncState::Clean);

    let expected_created: DateTime<Utc> = "2026-07-01T08:00:00Z".parse().unwrap();
    assert_eq!(change.reminder.created_at(), expected_created);

    let fence = change.geofence.expect("fence expected");
    assert_eq!(fence.radius().meters(), 120.0);
}

#[tokio::test]
async fn test_fetch_unknown_id_returns_none() {
    let (server, store) = common::setup_remote_store().await;
    let id = ReminderId::new();

    Mock::given(method("GET"))
        .and(path(format!("/v1/reminders/{id}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = store.fetch(&id).await.expect("404 is not an error");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_fetch_server_error_surfaces() {
    let (server, store) = common::setup_remote_store().await;
    let id = ReminderId::new();

    Mock::given(method("GET"))
        .and(path(format!("/v1/reminders/{id}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = store.fetch(&id).await.expect_err("500 must fail");
    assert!(format!("{err:#}").contains("500"));
}

#[tokio::test]
async fn test_ping_succeeds() {
    let (server, store) = common::setup_remote_store().await;

    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    store.ping().await.expect("ping failed");
}

#[tokio::test]
async fn test_ping_failure_reads_as_network_trouble() {
    let (server, store) = common::setup_remote_store().await;

    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = store.ping().await.expect_err("503 must fail");
    let remote_err = err
        .downcast_ref::<RemoteError>()
        .expect("RemoteError in chain");
    assert!(remote_err.is_network());
}
