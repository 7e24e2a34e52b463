//! Integration tests for change feed queries
//!
//! Verifies end-to-end behavior of the changes module against a
//! wiremock-based API mock:
//! - Initial read (no cursor) and incremental read (with cursor)
//! - Pagination across nextLink pages
//! - Tombstone normalization and document validation
//! - Expired cursor (410) surfacing, including through the port

use waymark_core::domain::newtypes::{CursorToken, ReminderId};
use waymark_core::domain::{ReminderState, SyncState};
use waymark_core::ports::remote_store::IRemoteStore;
use waymark_remote::{changes, RemoteError};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_initial_read_returns_all_documents() {
    let (server, client) = common::setup_api_mock().await;

    let fenced = ReminderId::new();
    let bare = ReminderId::new();
    let docs = serde_json::json!([
        common::reminder_doc_json(
            &fenced.to_string(),
            "Pick up parcel",
            3,
            "active",
            Some(common::geofence_json(52.52, 13.405, 150.0)),
        ),
        common::reminder_doc_json(&bare.to_string(), "Call the bank", 1, "active", None),
    ]);
    common::mount_changes_single_page(&server, docs, "w-00010").await;

    let batch = changes::fetch_changes(&client, None)
        .await
        .expect("initial feed read failed");

    assert_eq!(batch.changes.len(), 2);
    assert_eq!(batch.cursor.as_str(), "w-00010");

    let first = &batch.changes[0];
    assert_eq!(*first.reminder.id(), fenced);
    assert_eq!(first.reminder.title(), "Pick up parcel");
    assert_eq!(first.reminder.revision().value(), 3);
    assert_eq!(first.reminder.sync_state(), SyncState::Clean);
    let fence = first.geofence.as_ref().expect("fence expected");
    assert_eq!(fence.radius().meters(), 150.0);
    assert_eq!(fence.reminder_id(), &fenced);

    let second = &batch.changes[1];
    assert_eq!(*second.reminder.id(), bare);
    assert!(second.geofence.is_none());
}

#[tokio::test]
async fn test_incremental_read_submits_cursor() {
    let server = MockServer::start().await;
    let id = ReminderId::new();

    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .and(query_param("cursor", "w-00041"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": [common::reminder_doc_json(
                &id.to_string(),
                "New since last read",
                2,
                "active",
                None,
            )],
            "cursor": "w-00042"
        })))
        .mount(&server)
        .await;

    let client = waymark_remote::client::ApiClient::with_base_url("test-token", server.uri());
    let since = CursorToken::new("w-00041".to_string()).unwrap();

    let batch = changes::fetch_changes(&client, Some(&since))
        .await
        .expect("incremental feed read failed");

    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.changes[0].reminder.title(), "New since last read");
    assert_eq!(batch.cursor.as_str(), "w-00042");
}

#[tokio::test]
async fn test_pagination_is_followed_to_the_final_cursor() {
    let (server, client) = common::setup_api_mock().await;

    let a = ReminderId::new();
    let b = ReminderId::new();
    let c = ReminderId::new();
    let page1 = serde_json::json!([common::reminder_doc_json(
        &a.to_string(),
        "First page",
        1,
        "active",
        None,
    )]);
    let page2 = serde_json::json!([
        common::reminder_doc_json(&b.to_string(), "Second page", 1, "active", None),
        common::reminder_doc_json(&c.to_string(), "Also second page", 4, "completed", None),
    ]);
    common::mount_changes_paginated(&server, page1, page2, "w-00099").await;

    let batch = changes::fetch_changes(&client, None)
        .await
        .expect("paginated feed read failed");

    assert_eq!(batch.changes.len(), 3);
    // Feed order is preserved across pages.
    assert_eq!(*batch.changes[0].reminder.id(), a);
    assert_eq!(*batch.changes[1].reminder.id(), b);
    assert_eq!(*batch.changes[2].reminder.id(), c);
    assert_eq!(batch.changes[2].reminder.state(), ReminderState::Completed);
    assert_eq!(batch.cursor.as_str(), "w-00099");
}

#[tokio::test]
async fn test_empty_feed_still_returns_a_cursor() {
    let (server, client) = common::setup_api_mock().await;
    common::mount_changes_single_page(&server, serde_json::json!([]), "w-00005").await;

    let batch = changes::fetch_changes(&client, None)
        .await
        .expect("empty feed read failed");

    assert!(batch.changes.is_empty());
    assert_eq!(batch.cursor.as_str(), "w-00005");
}

#[tokio::test]
async fn test_tombstone_arrives_deleted_and_fenceless() {
    let (server, client) = common::setup_api_mock().await;

    // A misbehaving server attaches a fence to the tombstone; the
    // adapter must drop it.
    let id = ReminderId::new();
    let docs = serde_json::json!([common::reminder_doc_json(
        &id.to_string(),
        "Old errand",
        6,
        "deleted",
        Some(common::geofence_json(48.2082, 16.3738, 100.0)),
    )]);
    common::mount_changes_single_page(&server, docs, "w-00050").await;

    let batch = changes::fetch_changes(&client, None)
        .await
        .expect("tombstone feed read failed");

    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.changes[0].reminder.state(), ReminderState::Deleted);
    assert!(batch.changes[0].geofence.is_none());
}

#[tokio::test]
async fn test_expired_cursor_maps_to_cursor_expired() {
    let (server, client) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let since = CursorToken::new("w-ancient".to_string()).unwrap();
    let err = changes::fetch_changes(&client, Some(&since))
        .await
        .expect_err("expired cursor must fail");

    assert!(matches!(err, RemoteError::CursorExpired));
    assert!(err.to_string().to_lowercase().contains("cursor expired"));
}

#[tokio::test]
async fn test_expired_cursor_surfaces_through_the_port() {
    let (server, store) = common::setup_remote_store().await;

    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let since = CursorToken::new("w-ancient".to_string()).unwrap();
    let err = store
        .changes(Some(&since))
        .await
        .expect_err("expired cursor must fail");

    let remote_err = err
        .downcast_ref::<RemoteError>()
        .expect("RemoteError in chain");
    assert!(matches!(remote_err, RemoteError::CursorExpired));
}

#[tokio::test]
async fn test_feed_without_cursor_is_rejected() {
    let (server, client) = common::setup_api_mock().await;

    // Neither a nextLink nor a cursor: the adapter cannot produce a
    // watermark for the next read.
    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": []
        })))
        .mount(&server)
        .await;

    let err = changes::fetch_changes(&client, None)
        .await
        .expect_err("cursorless feed must fail");

    assert!(matches!(err, RemoteError::Decode(_)));
    assert!(err.to_string().contains("without a cursor"));
}

#[tokio::test]
async fn test_invalid_document_fails_the_read() {
    let (server, client) = common::setup_api_mock().await;

    let id = ReminderId::new();
    let docs = serde_json::json!([common::reminder_doc_json(
        &id.to_string(),
        "Bad state",
        2,
        "archived",
        None,
    )]);
    common::mount_changes_single_page(&server, docs, "w-00060").await;

    let err = changes::fetch_changes(&client, None)
        .await
        .expect_err("invalid document must fail");

    assert!(matches!(err, RemoteError::Decode(_)));
    assert!(err.to_string().contains("archived"));
}
