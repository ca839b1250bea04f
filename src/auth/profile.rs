use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AccessToken, AccountId};
use crate::cache::{profile_key, ResultCache};
use crate::gateway::{check_api_status, UnavailableError, UnavailableReason};
use crate::http;

/// Account metadata from the vendor's "who am I" endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<ProfileImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileImage {
    #[serde(default)]
    pub url: Option<String>,
}

/// Fetch the profile of whoever owns `token`.
///
/// Used before the token is associated with an account id, so it cannot go
/// through the gateway's refresh-and-retry path.
pub(crate) async fn fetch_profile(
    client: &reqwest::Client,
    profile_url: &str,
    token: &AccessToken,
    timeout: Duration,
) -> Result<PersonProfile, UnavailableError> {
    let request = client
        .get(profile_url)
        .bearer_auth(token.secret().expose_secret());
    let response = http::send(request, timeout).await?;
    check_api_status(response.status, &response.body)?;

    let profile: PersonProfile = serde_json::from_slice(&response.body).map_err(|e| {
        UnavailableError::new(
            UnavailableReason::VendorError,
            format!("Profile response was not valid JSON: {e}"),
        )
    })?;
    if profile.id.trim().is_empty() {
        return Err(UnavailableError::new(
            UnavailableReason::VendorError,
            "Profile response has an empty id",
        ));
    }
    Ok(profile)
}

pub(crate) async fn cached_profile(
    cache: &dyn ResultCache,
    account_id: &AccountId,
) -> Option<PersonProfile> {
    let value = cache.get(&profile_key(account_id)).await?;
    match serde_json::from_str(&value) {
        Ok(profile) => Some(profile),
        Err(e) => {
            tracing::debug!(account_id = %account_id, error = %e, "Discarding undecodable cached profile");
            None
        }
    }
}

pub(crate) async fn store_profile(
    cache: &dyn ResultCache,
    account_id: &AccountId,
    profile: &PersonProfile,
    ttl: Duration,
) {
    match serde_json::to_string(profile) {
        Ok(value) => cache.set(&profile_key(account_id), value, ttl).await,
        Err(e) => {
            tracing::warn!(account_id = %account_id, error = %e, "Failed to serialize profile for caching");
        }
    }
}
