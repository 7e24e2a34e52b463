//! HttpRemoteStore - IRemoteStore implementation for the Waymark API
//!
//! Wraps the [`ApiClient`] and fulfils the [`IRemoteStore`] port: feed
//! reads delegate to the [`crate::changes`] module, push and fetch talk
//! to the document endpoints directly.
//!
//! ## Design Notes
//!
//! - Revision rejection is an expected outcome, not an error: a 412 is
//!   decoded into the server's current document and surfaced through
//!   [`PushOutcome::Rejected`] for the engine to merge.
//! - `fetch` maps 404 to `None`; the remote has simply never seen the id.

use anyhow::{Context, Result};
use reqwest::{header, Method, StatusCode};
use tracing::debug;

use waymark_core::domain::newtypes::{CursorToken, ReminderId};
use waymark_core::domain::{Geofence, Reminder};
use waymark_core::ports::remote_store::{ChangeBatch, IRemoteStore, PushOutcome, RemoteChange};

use crate::changes::{self, ReminderDoc};
use crate::client::{decode_json, ensure_success, ApiClient};
use crate::RemoteError;

/// Builds the document path for one reminder
fn reminder_path(id: &ReminderId) -> String {
    format!("/v1/reminders/{id}")
}

// ============================================================================
// HttpRemoteStore
// ============================================================================

/// Remote store implementation that talks to the Waymark API
pub struct HttpRemoteStore {
    /// The underlying API client
    client: ApiClient,
}

impl HttpRemoteStore {
    /// Creates a new `HttpRemoteStore` wrapping the given [`ApiClient`]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Submits one document with the optimistic revision check
    ///
    /// Sends `PUT /v1/reminders/{id}` with `If-Match` set to the
    /// submitted revision. A 412 is decoded into
    /// [`RemoteError::RevisionRejected`] carrying the server's current
    /// copy.
    async fn put_document(
        &self,
        reminder: &Reminder,
        geofence: Option<&Geofence>,
    ) -> Result<(), RemoteError> {
        let doc = ReminderDoc::from_domain(reminder, geofence);
        let response = self
            .client
            .request(Method::PUT, &reminder_path(reminder.id()))
            .header(header::IF_MATCH, reminder.revision().value().to_string())
            .json(&doc)
            .send()
            .await?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            let server: ReminderDoc = decode_json(response).await?;
            let current = server.into_change()?;
            return Err(RemoteError::RevisionRejected {
                current: Box::new(current),
            });
        }

        ensure_success(response)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRemoteStore for HttpRemoteStore {
    /// Reads the change feed since the given cursor
    ///
    /// Delegates to [`changes::fetch_changes`], which follows pagination
    /// internally.
    async fn changes(&self, since: Option<&CursorToken>) -> Result<ChangeBatch> {
        debug!(has_cursor = since.is_some(), "HttpRemoteStore::changes");
        Ok(changes::fetch_changes(&self.client, since).await?)
    }

    /// Pushes a local copy with its revision for the optimistic check
    async fn push(
        &self,
        reminder: &Reminder,
        geofence: Option<&Geofence>,
    ) -> Result<PushOutcome> {
        debug!(
            id = %reminder.id(),
            revision = %reminder.revision(),
            has_fence = geofence.is_some(),
            "HttpRemoteStore::push"
        );

        match self.put_document(reminder, geofence).await {
            Ok(()) => Ok(PushOutcome::Accepted),
            Err(RemoteError::RevisionRejected { current }) => {
                debug!(
                    id = %reminder.id(),
                    server_revision = %current.reminder.revision(),
                    "Push rejected by revision check"
                );
                Ok(PushOutcome::Rejected { current: *current })
            }
            Err(err) => Err(err).context("Pushing reminder document failed"),
        }
    }

    /// Retrieves the remote's current copy of one reminder
    async fn fetch(&self, id: &ReminderId) -> Result<Option<RemoteChange>> {
        debug!(id = %id, "HttpRemoteStore::fetch");

        let response = self
            .client
            .request(Method::GET, &reminder_path(id))
            .send()
            .await
            .map_err(RemoteError::Network)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let doc: ReminderDoc = decode_json(ensure_success(response)?).await?;
        Ok(Some(doc.into_change()?))
    }

    /// Cheap connectivity probe
    ///
    /// Delegates to [`ApiClient::ping`].
    async fn ping(&self) -> Result<()> {
        debug!("HttpRemoteStore::ping");
        Ok(self.client.ping().await?)
    }
}
