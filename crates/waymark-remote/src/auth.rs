//! API token resolution for the Waymark API
//!
//! The daemon authenticates with a bearer token issued per account. The
//! token is looked up in order:
//!
//! 1. `remote.api_token` in the configuration file
//! 2. The `WAYMARK_API_TOKEN` environment variable
//! 3. The system keyring (service "waymark")
//!
//! Empty values are treated as unset at every step, so a blank config
//! entry falls through to the environment and the keyring.

use anyhow::{Context, Result};
use tracing::debug;

use waymark_core::config::RemoteConfig;

/// Keyring service name for storing the API token
const KEYRING_SERVICE: &str = "waymark";

/// Keyring entry name; the daemon holds one token per machine account
const KEYRING_ENTRY: &str = "api-token";

/// Environment variable consulted when the config carries no token
const TOKEN_ENV_VAR: &str = "WAYMARK_API_TOKEN";

// ============================================================================
// KeyringTokenStore
// ============================================================================

/// Stores and retrieves the API token from the system keyring
///
/// Uses the `keyring` crate to keep the token in the OS credential store
/// (e.g., GNOME Keyring, KDE Wallet) under the service name "waymark".
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    /// Stores the API token in the system keyring
    pub fn store(token: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)
            .context("Failed to create keyring entry")?;

        entry
            .set_password(token)
            .context("Failed to store API token in keyring")?;

        debug!("Stored API token in keyring");
        Ok(())
    }

    /// Loads the API token from the system keyring
    ///
    /// Returns `None` when no token has been stored.
    pub fn load() -> Result<Option<String>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(token) => {
                debug!("Loaded API token from keyring");
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No API token found in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes the API token from the system keyring
    pub fn clear() -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                debug!("Cleared API token from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No API token to clear");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// Token resolution
// ============================================================================

/// Resolves the API token following the documented precedence
///
/// # Errors
///
/// Fails when no token is configured anywhere, or when the keyring is
/// present but unreadable.
pub fn resolve_token(remote: &RemoteConfig) -> Result<String> {
    if let Some(token) = remote.api_token.as_deref() {
        if !token.is_empty() {
            debug!("Using API token from configuration");
            return Ok(token.to_string());
        }
    }

    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        if !token.is_empty() {
            debug!("Using API token from {}", TOKEN_ENV_VAR);
            return Ok(token);
        }
    }

    if let Some(token) = KeyringTokenStore::load()? {
        debug!("Using API token from keyring");
        return Ok(token);
    }

    anyhow::bail!(
        "No API token configured: set remote.api_token, export {}, or store one in the keyring",
        TOKEN_ENV_VAR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_config(api_token: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            base_url: "https://api.waymark.app".to_string(),
            api_token: api_token.map(str::to_string),
            device_name: "test-device".to_string(),
        }
    }

    // Env manipulation stays inside a single test body so parallel
    // tests never observe a half-set variable.
    #[test]
    fn test_resolution_precedence() {
        std::env::set_var(TOKEN_ENV_VAR, "from-env");

        let with_config = remote_config(Some("from-config"));
        assert_eq!(resolve_token(&with_config).unwrap(), "from-config");

        let without_config = remote_config(None);
        assert_eq!(resolve_token(&without_config).unwrap(), "from-env");

        let blank_config = remote_config(Some(""));
        assert_eq!(resolve_token(&blank_config).unwrap(), "from-env");

        std::env::remove_var(TOKEN_ENV_VAR);
    }
}
