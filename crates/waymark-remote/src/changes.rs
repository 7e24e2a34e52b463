//! Change feed queries for incremental synchronization
//!
//! Implements the "changes since cursor" read of the Waymark API, which
//! returns only documents written after the submitted watermark.
//!
//! ## Feed Flow
//!
//! 1. **Initial read**: call [`fetch_changes`] with `since = None` to get
//!    every document the account holds
//! 2. **Follow pages**: the function follows `nextLink` pages internally
//! 3. **Save cursor**: the final page carries the `cursor` watermark for
//!    the next read
//! 4. **Incremental read**: call [`fetch_changes`] with the saved cursor
//!    to get only what changed since
//!
//! An expired or unknown cursor comes back as 410 Gone and surfaces as
//! [`RemoteError::CursorExpired`]; the caller falls back to a full read.
//!
//! This module also owns the wire document types. Remote copies convert
//! to domain entities through the validated constructors and always
//! arrive with sync state Clean; tombstones are reminders in the Deleted
//! state and never carry a geofence.

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use waymark_core::domain::newtypes::{
    CursorToken, DeviceId, Latitude, Longitude, RadiusMeters, ReminderId, Revision,
};
use waymark_core::domain::{
    DomainError, Geofence, Reminder, ReminderState, SyncState, TriggerOn,
};
use waymark_core::ports::remote_store::{ChangeBatch, RemoteChange};

use crate::client::{decode_json, ensure_success, ApiClient};
use crate::RemoteError;

/// Path of the change feed endpoint relative to the API base URL
const CHANGES_PATH: &str = "/v1/changes";

// ============================================================================
// Wire document types (JSON serialization)
// ============================================================================

/// One page of the change feed
///
/// Represents the JSON structure returned by `GET /v1/changes`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesPage {
    /// Documents changed since the submitted cursor, in feed order
    #[serde(default)]
    changes: Vec<ReminderDoc>,

    /// Absolute URL of the next page (present when more pages exist)
    next_link: Option<String>,

    /// Watermark for the next read (present on the final page)
    cursor: Option<String>,
}

/// A reminder document on the wire
///
/// Identifiers and enums travel as strings and are validated on the way
/// into the domain; numeric fields go through the checked constructors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReminderDoc {
    /// Reminder id (UUID)
    pub(crate) id: String,
    /// Reminder title
    pub(crate) title: String,
    /// Optional free-form note
    pub(crate) note: Option<String>,
    /// Optional reference to an externally-owned image
    pub(crate) image_ref: Option<String>,
    /// Lifecycle state: "active", "completed", or "deleted"
    pub(crate) state: String,
    /// Revision counter, >= 1
    pub(crate) revision: u64,
    /// Creation timestamp
    pub(crate) created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub(crate) modified_at: DateTime<Utc>,
    /// Device that performed the last modification (UUID)
    pub(crate) modified_by: String,
    /// The reminder's geofence, absent for pure time/manual reminders
    pub(crate) geofence: Option<GeofenceDoc>,
}

/// A geofence embedded in a reminder document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeofenceDoc {
    /// Center latitude in decimal degrees
    pub(crate) latitude: f64,
    /// Center longitude in decimal degrees
    pub(crate) longitude: f64,
    /// Radius in meters, positive and finite
    pub(crate) radius_meters: f64,
    /// Trigger setting: "on_enter", "on_exit", or "both"
    pub(crate) trigger_on: String,
    /// Whether the fence is currently armed
    pub(crate) armed: bool,
    /// Whether the fence disarms after its first trigger
    pub(crate) one_shot: bool,
}

fn decode_err(err: DomainError) -> RemoteError {
    RemoteError::Decode(err.to_string())
}

impl ReminderDoc {
    /// Builds the wire document for a local reminder and its fence
    pub(crate) fn from_domain(reminder: &Reminder, geofence: Option<&Geofence>) -> Self {
        Self {
            id: reminder.id().to_string(),
            title: reminder.title().to_string(),
            note: reminder.note().map(str::to_string),
            image_ref: reminder.image_ref().map(str::to_string),
            state: reminder.state().name().to_string(),
            revision: reminder.revision().value(),
            created_at: reminder.created_at(),
            modified_at: reminder.modified_at(),
            modified_by: reminder.modified_by().to_string(),
            geofence: geofence.map(GeofenceDoc::from_domain),
        }
    }

    /// Converts the document into a validated domain change
    ///
    /// Remote copies are constructed Clean. A geofence on a tombstone is
    /// dropped rather than applied.
    pub(crate) fn into_change(self) -> Result<RemoteChange, RemoteError> {
        let id = self.id.parse::<ReminderId>().map_err(decode_err)?;
        let state = self.state.parse::<ReminderState>().map_err(decode_err)?;
        let modified_by = self.modified_by.parse::<DeviceId>().map_err(decode_err)?;

        if self.title.is_empty() {
            return Err(RemoteError::Decode(format!(
                "reminder {id} has an empty title"
            )));
        }
        if self.revision == 0 {
            return Err(RemoteError::Decode(format!(
                "reminder {id} has revision 0"
            )));
        }

        let geofence = if state == ReminderState::Deleted {
            None
        } else {
            self.geofence.map(|doc| doc.into_domain(id)).transpose()?
        };

        let reminder = Reminder::from_parts(
            id,
            self.title,
            self.note,
            self.image_ref,
            self.created_at,
            self.modified_at,
            state,
            Revision::from_u64(self.revision),
            modified_by,
            SyncState::Clean,
        );

        Ok(RemoteChange { reminder, geofence })
    }
}

impl GeofenceDoc {
    fn from_domain(geofence: &Geofence) -> Self {
        Self {
            latitude: geofence.latitude().degrees(),
            longitude: geofence.longitude().degrees(),
            radius_meters: geofence.radius().meters(),
            trigger_on: geofence.trigger_on().name().to_string(),
            armed: geofence.is_armed(),
            one_shot: geofence.is_one_shot(),
        }
    }

    fn into_domain(self, reminder_id: ReminderId) -> Result<Geofence, RemoteError> {
        let latitude = Latitude::new(self.latitude).map_err(decode_err)?;
        let longitude = Longitude::new(self.longitude).map_err(decode_err)?;
        let radius = RadiusMeters::new(self.radius_meters).map_err(decode_err)?;
        let trigger_on = self.trigger_on.parse::<TriggerOn>().map_err(decode_err)?;

        Ok(Geofence::from_parts(
            reminder_id,
            latitude,
            longitude,
            radius,
            trigger_on,
            self.armed,
            self.one_shot,
        ))
    }
}

// ============================================================================
// Change feed query
// ============================================================================

/// Reads all changes since the given cursor, following pagination
///
/// Makes the initial feed request and follows every `nextLink` page
/// until the final page, which carries the cursor for the next read.
///
/// # Arguments
///
/// * `client` - The authenticated [`ApiClient`]
/// * `since` - Cursor from a previous read, or `None` for the initial
///   full read
///
/// # Errors
///
/// Returns [`RemoteError::CursorExpired`] when the server no longer
/// recognizes the cursor (410 Gone), [`RemoteError::Decode`] when a
/// document fails validation or the feed ends without a cursor, and
/// the usual network/status errors otherwise.
pub async fn fetch_changes(
    client: &ApiClient,
    since: Option<&CursorToken>,
) -> Result<ChangeBatch, RemoteError> {
    let path = match since {
        Some(token) => format!("{}?cursor={}", CHANGES_PATH, token.as_str()),
        None => CHANGES_PATH.to_string(),
    };

    debug!(has_cursor = since.is_some(), "Starting change feed query");

    let response = client.request(Method::GET, &path).send().await?;

    if response.status() == StatusCode::GONE {
        return Err(RemoteError::CursorExpired);
    }

    let mut page: ChangesPage = decode_json(ensure_success(response)?).await?;

    let mut changes: Vec<RemoteChange> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page_count: u32 = 1;

    loop {
        debug!(
            page = page_count,
            entries = page.changes.len(),
            has_next = page.next_link.is_some(),
            "Received change feed page"
        );

        for doc in std::mem::take(&mut page.changes) {
            changes.push(doc.into_change()?);
        }
        if let Some(token) = page.cursor.take() {
            cursor = Some(token);
        }

        match page.next_link.take() {
            Some(next_link) => {
                page_count += 1;
                page = fetch_page(client, &next_link).await?;
            }
            None => break,
        }
    }

    debug!(
        total_entries = changes.len(),
        total_pages = page_count,
        "Change feed query complete"
    );

    let Some(cursor) = cursor else {
        return Err(RemoteError::Decode(
            "change feed ended without a cursor".to_string(),
        ));
    };
    let cursor = CursorToken::new(cursor).map_err(decode_err)?;

    Ok(ChangeBatch { changes, cursor })
}

/// Fetches a single feed page from a `nextLink` URL
///
/// Page links are absolute URLs, so this bypasses the base URL handling
/// in [`ApiClient::request`] and authenticates directly.
async fn fetch_page(client: &ApiClient, next_link: &str) -> Result<ChangesPage, RemoteError> {
    let response = client
        .http_client()
        .get(next_link)
        .bearer_auth(client.api_token())
        .send()
        .await?;

    decode_json(ensure_success(response)?).await
}

// ============================================================================
// Tests
// ============================================================================
