//! OAuth2 access for vendor API calls made on behalf of an account.
//!
//! The [`TokenManager`] turns a stored refresh token into a short-lived
//! access token, caches it for its remaining lifetime, and forgets accounts
//! whose grant the vendor reports as revoked.

mod manager;
mod profile;
mod tokens;

pub use manager::{TokenError, TokenManager};
pub use profile::PersonProfile;
pub(crate) use profile::{cached_profile, fetch_profile, store_profile};
pub use tokens::{AccessToken, TokenGrant};

use secrecy::SecretString;
use std::fmt;
use std::time::Duration;

use crate::config::{Config, ConfigError};

/// Opaque identifier of a remote account.
///
/// Any non-empty string is accepted here; the feed handler applies the
/// stricter 21-digit check on input it receives from clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vendor account and page ids are exactly 21 ASCII digits.
    pub fn is_canonical(id: &str) -> bool {
        id.len() == 21 && id.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vendor OAuth2 client configuration and endpoints.
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Must match the redirect URI registered with the vendor
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    /// "Who am I" endpoint
    pub profile_url: String,
    pub scope: String,
    /// Applied to every token exchange and profile request
    pub timeout: Duration,
    pub profile_ttl: Duration,
}

impl OAuthSettings {
    /// Build settings from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when the client id or secret is unset.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client_id = config
            .oauth
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing("oauth.client_id"))?;
        let client_secret = config
            .oauth
            .client_secret()
            .ok_or(ConfigError::Missing("oauth.client_secret"))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: config.oauth.redirect_uri.clone(),
            auth_url: config.oauth.auth_url.clone(),
            token_url: config.oauth.token_url.clone(),
            profile_url: format!("{}/people/me", config.api.base_url.trim_end_matches('/')),
            scope: config.oauth.scope.clone(),
            timeout: Duration::from_secs(config.api.timeout_secs.max(1)),
            profile_ttl: Duration::from_secs(config.cache.profile_ttl_secs),
        })
    }
}
