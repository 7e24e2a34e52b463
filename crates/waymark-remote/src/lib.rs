//! Waymark Remote - HTTP client for the remote reminder store
//!
//! Provides the async adapter behind the `IRemoteStore` port:
//! - Change feed reads ("changes since cursor") with internal pagination
//! - Optimistic revision-checked pushes (`If-Match`)
//! - Single-document fetch and a cheap connectivity probe
//! - API token resolution (config, environment, system keyring)
//!
//! ## Modules
//!
//! - [`auth`] - API token resolution and keyring storage
//! - [`client`] - Authenticated HTTP client for the Waymark API
//! - [`changes`] - Change feed queries and wire document conversion
//! - [`provider`] - [`IRemoteStore`] implementation backed by the API

pub mod auth;
pub mod changes;
pub mod client;
pub mod provider;

use thiserror::Error;
use waymark_core::ports::remote_store::RemoteChange;

/// Errors that can occur when communicating with the Waymark API
///
/// The sync engine classifies failures from the error chain's display
/// text, so the messages here are part of the adapter contract:
/// [`RemoteError::Network`] and the retryable HTTP statuses read as
/// network errors, and [`RemoteError::CursorExpired`] reads as an
/// expired cursor.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A connection-level failure talking to the API
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error: HTTP {status}")]
    Api {
        /// The HTTP status code
        status: u16,
    },

    /// The optimistic revision check failed; the server kept its copy
    #[error("Push rejected: server holds revision {}", .current.reminder.revision())]
    RevisionRejected {
        /// The server's current document, for the caller to merge against
        current: Box<RemoteChange>,
    },

    /// The submitted change cursor is no longer valid on the server
    #[error("Sync cursor expired (410 Gone)")]
    CursorExpired,

    /// The response body could not be parsed or failed domain validation
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether this failure is transient connectivity rather than a
    /// protocol or data problem
    ///
    /// Throttling (429) and upstream gateway failures (502/503/504) are
    /// treated as network conditions: retrying later is the right call.
    pub fn is_network(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Api { status } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_carries_status() {
        let err = RemoteError::Api { status: 503 };
        assert_eq!(err.to_string(), "API error: HTTP 503");
    }

    #[test]
    fn test_cursor_expired_display() {
        let err = RemoteError::CursorExpired;
        assert!(err.to_string().to_lowercase().contains("cursor expired"));
    }

    #[test]
    fn test_is_network_classification() {
        assert!(RemoteError::Api { status: 429 }.is_network());
        assert!(RemoteError::Api { status: 502 }.is_network());
        assert!(RemoteError::Api { status: 503 }.is_network());
        assert!(RemoteError::Api { status: 504 }.is_network());
        assert!(!RemoteError::Api { status: 400 }.is_network());
        assert!(!RemoteError::Api { status: 500 }.is_network());
        assert!(!RemoteError::CursorExpired.is_network());
        assert!(!RemoteError::Decode("bad json".to_string()).is_network());
    }
}
