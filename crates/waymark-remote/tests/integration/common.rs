//! Shared test helpers for Waymark API integration tests
//!
//! Provides wiremock-based mock server setup plus JSON and domain
//! fixture builders shared by the per-area test files.

use chrono::Utc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waymark_core::domain::newtypes::{DeviceId, ReminderId, Revision};
use waymark_core::domain::{Geofence, Reminder, ReminderState, SyncState, TriggerOn};
use waymark_remote::client::ApiClient;
use waymark_remote::provider::HttpRemoteStore;

/// Device id stamped on documents the mock server serves
pub const REMOTE_DEVICE: &str = "1c2d3e4f-5a6b-4c8d-9e0f-1a2b3c4d5e6f";

/// Starts a mock server and returns it with a client pointed at it.
pub async fn setup_api_mock() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let client = ApiClient::with_base_url("test-api-token", server.uri());
    (server, client)
}

/// Starts a mock server and returns it with a port-level store.
pub async fn setup_remote_store() -> (MockServer, HttpRemoteStore) {
    let server = MockServer::start().await;
    let store = HttpRemoteStore::new(ApiClient::with_base_url("test-api-token", server.uri()));
    (server, store)
}

/// Builds the JSON document for one reminder as the server sends it.
pub fn reminder_doc_json(
    id: &str,
    title: &str,
    revision: u64,
    state: &str,
    geofence: Option<serde_json::Value>,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "note": null,
        "imageRef": null,
        "state": state,
        "revision": revision,
        "createdAt": "2026-07-01T08:00:00Z",
        "modifiedAt": "2026-07-02T09:30:00Z",
        "modifiedBy": REMOTE_DEVICE,
        "geofence": geofence
    })
}

/// Builds the JSON for an on-enter geofence at the given center.
pub fn geofence_json(latitude: f64, longitude: f64, radius_meters: f64) -> serde_json::Value {
    serde_json::json!({
        "latitude": latitude,
        "longitude": longitude,
        "radiusMeters": radius_meters,
        "triggerOn": "on_enter",
        "armed": true,
        "oneShot": false
    })
}

/// Mounts a change feed endpoint that returns a single page.
pub async fn mount_changes_single_page(
    server: &MockServer,
    changes: serde_json::Value,
    cursor: &str,
) {
    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": changes,
            "cursor": cursor
        })))
        .mount(server)
        .await;
}

/// Mounts a change feed that returns two pages (pagination test).
///
/// The first request returns page 1 with a nextLink; the request to the
/// nextLink returns page 2 with the final cursor.
pub async fn mount_changes_paginated(
    server: &MockServer,
    page1: serde_json::Value,
    page2: serde_json::Value,
    cursor: &str,
) {
    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": page1,
            "nextLink": format!("{}/v1/changes?page=2", server.uri())
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "changes": page2,
            "cursor": cursor
        })))
        .mount(server)
        .await;
}

/// Builds a locally modified reminder at the given revision.
pub fn local_reminder(title: &str, revision: u64) -> Reminder {
    let created = Utc::now();
    Reminder::from_parts(
        ReminderId::new(),
        title.to_string(),
        None,
        None,
        created,
        created,
        ReminderState::Active,
        Revision::from_u64(revision),
        DeviceId::new(),
        SyncState::LocallyModified,
    )
}

/// Builds a 150 m on-enter fence for the given reminder.
pub fn fence_for(reminder: &Reminder) -> Geofence {
    Geofence::new(
        *reminder.id(),
        52.52,
        13.405,
        150.0,
        TriggerOn::OnEnter,
        false,
    )
    .unwrap()
}
