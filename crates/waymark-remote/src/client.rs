//! Waymark API client
//!
//! Provides a typed HTTP client for the Waymark reminder store API.
//! Handles bearer authentication, endpoint construction, and the status
//! triage shared by the endpoint modules.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use waymark_remote::client::ApiClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::new("api-token-here");
//! client.ping().await?;
//! # Ok(())
//! # }
//! ```

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::RemoteError;

/// Base URL for the hosted Waymark API
const DEFAULT_BASE_URL: &str = "https://api.waymark.app";

/// Path of the connectivity probe endpoint
const PING_PATH: &str = "/v1/ping";

// ============================================================================
// ApiClient
// ============================================================================

/// HTTP client for Waymark API calls
///
/// Wraps `reqwest::Client` with bearer authentication and base URL
/// construction. The endpoint modules ([`crate::changes`],
/// [`crate::provider`]) build their requests through [`ApiClient::request`].
pub struct ApiClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    base_url: String,
    /// Bearer token sent on every request
    api_token: String,
}

impl ApiClient {
    /// Creates a new ApiClient against the hosted API
    ///
    /// # Arguments
    /// * `api_token` - A valid Waymark API token
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: api_token.into(),
        }
    }

    /// Creates a new ApiClient with a custom base URL (useful for testing)
    ///
    /// # Arguments
    /// * `api_token` - A valid Waymark API token
    /// * `base_url` - Custom base URL for API requests
    pub fn with_base_url(api_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    /// Returns a reference to the current API token
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// Automatically prepends the base URL and adds the Authorization header.
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, PUT, DELETE, etc.)
    /// * `path` - API path relative to the base URL (e.g., "/v1/changes")
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url).bearer_auth(&self.api_token)
    }

    /// Probes connectivity with `GET /v1/ping`
    ///
    /// Any success status counts as reachable.
    pub async fn ping(&self) -> Result<(), RemoteError> {
        debug!("Pinging the Waymark API");
        let response = self.request(Method::GET, PING_PATH).send().await?;
        ensure_success(response)?;
        Ok(())
    }

    /// Returns a reference to the underlying HTTP client
    ///
    /// Used for requests to absolute URLs (e.g., change feed page links)
    /// rather than paths relative to the base URL.
    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }
}

// ============================================================================
// Shared response triage
// ============================================================================

/// Maps a non-success response to [`RemoteError::Api`]
///
/// Endpoint-specific statuses (410 on the change feed, 412 on pushes,
/// 404 on fetches) are intercepted by the callers before this runs.
pub(crate) fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RemoteError::Api {
            status: status.as_u16(),
        })
    }
}

/// Decodes a JSON body, mapping parse failures to [`RemoteError::Decode`]
pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|err| RemoteError::Decode(err.to_string()))
}
