//! Integration tests for revision-checked pushes
//!
//! Verifies the `PUT /v1/reminders/{id}` contract end to end:
//! - Accepted pushes carry `If-Match` and the camelCase document body
//! - A 412 surfaces as `PushOutcome::Rejected` with the server's copy
//! - Server failures surface as errors, classified for backoff

use waymark_core::domain::{ReminderState, SyncState};
use waymark_core::ports::remote_store::{IRemoteStore, PushOutcome};
use waymark_remote::RemoteError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_accepted_push_sends_if_match_and_document() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Buy stamps", 2);

    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .and(header("If-Match", "2"))
        .and(body_partial_json(serde_json::json!({
            "id": reminder.id().to_string(),
            "title": "Buy stamps",
            "state": "active",
            "revision": 2,
            "geofence": null
        })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let outcome = store
        .push(&reminder, None)
        .await
        .expect("accepted push failed");

    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_push_includes_the_geofence() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Pick up parcel", 1);
    let fence = common::fence_for(&reminder);

    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .and(body_partial_json(serde_json::json!({
            "geofence": {
                "latitude": 52.52,
                "longitude": 13.405,
                "radiusMeters": 150.0,
                "triggerOn": "on_enter",
                "armed": true,
                "oneShot": false
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let outcome = store
        .push(&reminder, Some(&fence))
        .await
        .expect("fenced push failed");

    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_rejected_push_carries_the_server_copy() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Stale local edit", 2);

    let server_doc = common::reminder_doc_json(
        &reminder.id().to_string(),
        "Fresher remote edit",
        5,
        "active",
        Some(common::geofence_json(48.8566, 2.3522, 200.0)),
    );
    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .respond_with(ResponseTemplate::new(412).set_body_json(server_doc))
        .mount(&server)
        .await;

    let outcome = store
        .push(&reminder, None)
        .await
        .expect("rejected push is not an error");

    match outcome {
        PushOutcome::Rejected { current } => {
            assert_eq!(current.reminder.id(), reminder.id());
            assert_eq!(current.reminder.title(), "Fresher remote edit");
            assert_eq!(current.reminder.revision().value(), 5);
            assert_eq!(current.reminder.sync_state(), SyncState::Clean);
            let fence = current.geofence.expect("server copy carries its fence");
            assert_eq!(fence.radius().meters(), 200.0);
        }
        PushOutcome::Accepted => panic!("push must be rejected"),
    }
}

#[tokio::test]
async fn test_rejected_tombstone_body_converts() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Edited after remote delete", 3);

    let server_doc = common::reminder_doc_json(
        &reminder.id().to_string(),
        "Edited after remote delete",
        7,
        "deleted",
        None,
    );
    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .respond_with(ResponseTemplate::new(412).set_body_json(server_doc))
        .mount(&server)
        .await;

    let outcome = store.push(&reminder, None).await.expect("rejection failed");

    match outcome {
        PushOutcome::Rejected { current } => {
            assert_eq!(current.reminder.state(), ReminderState::Deleted);
            assert!(current.geofence.is_none());
        }
        PushOutcome::Accepted => panic!("push must be rejected"),
    }
}

#[tokio::test]
async fn test_server_failure_is_a_network_class_error() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Unlucky", 1);

    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = store
        .push(&reminder, None)
        .await
        .expect_err("503 must surface as an error");

    assert!(format!("{err:#}").contains("503"));
    let remote_err = err
        .downcast_ref::<RemoteError>()
        .expect("RemoteError in chain");
    assert!(remote_err.is_network());
}

#[tokio::test]
async fn test_malformed_rejection_body_is_an_error() {
    let (server, store) = common::setup_remote_store().await;
    let reminder = common::local_reminder("Garbled", 2);

    Mock::given(method("PUT"))
        .and(path(format!("/v1/reminders/{}", reminder.id())))
        .respond_with(ResponseTemplate::new(412).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = store
        .push(&reminder, None)
        .await
        .expect_err("undecodable rejection must surface as an error");

    assert!(format!("{err:#}").contains("Invalid response"));
}
