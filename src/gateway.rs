//! Authenticated calls to the vendor API on behalf of an account.
//!
//! Every vendor-facing failure is converted into an [`UnavailableError`] at
//! this boundary; raw network or JSON errors never reach callers.

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::{cached_profile, store_profile, AccountId, PersonProfile, TokenError, TokenManager};
use crate::cache::ResultCache;
use crate::feed::Activity;
use crate::http::{self, body_snippet, HttpError};

/// One initial attempt plus one retry after a 401.
const MAX_ATTEMPTS: u32 = 2;

/// Advisory back-off sent with 503 responses.
pub const RETRY_AFTER: Duration = Duration::from_secs(60);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Never authorized, revoked, or the vendor rejected a fresh token
    NoCredential,
    /// Vendor did not answer in time
    Timeout,
    /// Vendor answered 403, its rate-limit/quota signal
    VendorRateLimited,
    /// Any other non-200, malformed or unexpected vendor response
    VendorError,
    /// Local failure (token store, bad endpoint configuration)
    Internal,
}

impl UnavailableReason {
    /// HTTP status to report to our own client.
    pub fn status(self) -> u16 {
        match self {
            UnavailableReason::NoCredential => 401,
            UnavailableReason::Timeout => 504,
            UnavailableReason::VendorRateLimited => 503,
            UnavailableReason::VendorError => 502,
            UnavailableReason::Internal => 500,
        }
    }
}

/// The vendor could not provide a usable answer.
#[derive(Debug, Error)]
#[error("{message} (HTTP {status})")]
pub struct UnavailableError {
    pub reason: UnavailableReason,
    pub status: u16,
    pub message: String,
}

impl UnavailableError {
    pub fn new(reason: UnavailableReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            status: reason.status(),
            message: message.into(),
        }
    }

    /// `Retry-After` to advertise, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.reason {
            UnavailableReason::VendorRateLimited => Some(RETRY_AFTER),
            _ => None,
        }
    }
}

impl From<HttpError> for UnavailableError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout => {
                UnavailableError::new(UnavailableReason::Timeout, "Vendor API request timed out")
            }
            HttpError::Network(e) => UnavailableError::new(
                UnavailableReason::VendorError,
                format!("Vendor API request failed: {e}"),
            ),
            HttpError::ResponseTooLarge => UnavailableError::new(
                UnavailableReason::VendorError,
                "Vendor API response too large",
            ),
        }
    }
}

impl From<TokenError> for UnavailableError {
    fn from(err: TokenError) -> Self {
        let reason = match &err {
            // Callers cannot tell "never authorized" from "revoked": both
            // mean the account has to go through authorization again.
            TokenError::NoCredential(_) | TokenError::Revoked(_) | TokenError::InvalidGrant => {
                UnavailableReason::NoCredential
            }
            TokenError::Timeout => UnavailableReason::Timeout,
            TokenError::Profile(inner) => inner.reason,
            TokenError::Rejected(_)
            | TokenError::Malformed(_)
            | TokenError::UnexpectedTokenType(_)
            | TokenError::Network(_) => UnavailableReason::VendorError,
            TokenError::Store(_) => UnavailableReason::Internal,
        };
        UnavailableError::new(reason, err.to_string())
    }
}

/// Map a vendor API status to success or the matching failure.
pub(crate) fn check_api_status(status: u16, body: &[u8]) -> Result<(), UnavailableError> {
    match status {
        200 => Ok(()),
        401 => Err(UnavailableError::new(
            UnavailableReason::NoCredential,
            "Invalid access token",
        )),
        403 => Err(UnavailableError::new(
            UnavailableReason::VendorRateLimited,
            format!("Vendor API 403 response: {}", body_snippet(body)),
        )),
        _ => Err(UnavailableError::new(
            UnavailableReason::VendorError,
            format!("Unknown vendor API error (code={status}): {}", body_snippet(body)),
        )),
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// Request template; the gateway adds credentials on every attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: Url,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Successful (HTTP 200) vendor response.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body, reporting a shape mismatch as a vendor error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UnavailableError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            UnavailableError::new(
                UnavailableReason::VendorError,
                format!("Unexpected vendor API response: {e}"),
            )
        })
    }
}

/// One page of an account's public activity stream.
#[derive(Debug, Default, Deserialize)]
pub struct ActivityPage {
    #[serde(default)]
    pub items: Vec<Activity>,
    #[serde(default, rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

// ============================================================================
// Gateway
// ============================================================================

pub struct FetchGateway {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    cache: Arc<dyn ResultCache>,
    api_base: String,
    max_results: u32,
}

impl FetchGateway {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<TokenManager>,
        cache: Arc<dyn ResultCache>,
        api_base: impl Into<String>,
        max_results: u32,
    ) -> Self {
        Self {
            client,
            tokens,
            cache,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            max_results,
        }
    }

    /// Issue `request` as `account_id`.
    ///
    /// A 401 on the first attempt drops the cached access token and runs the
    /// whole sequence once more; a 401 on the second attempt is final.
    pub async fn authed_fetch(
        &self,
        account_id: &AccountId,
        request: &ApiRequest,
    ) -> Result<ApiResponse, UnavailableError> {
        let timeout = self.tokens.settings().timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let token = self.tokens.get_access_token(account_id).await?;
            let outgoing = self
                .client
                .request(request.method.clone(), request.url.clone())
                .header(
                    AUTHORIZATION,
                    format!("Bearer {}", token.secret().expose_secret()),
                );
            let response = http::send(outgoing, timeout).await?;

            if response.status == 401 && attempt < MAX_ATTEMPTS {
                tracing::info!(
                    account_id = %account_id,
                    attempt = attempt,
                    "Access token rejected, refreshing and retrying"
                );
                self.tokens.invalidate(account_id).await;
                continue;
            }

            if let Err(e) = check_api_status(response.status, &response.body) {
                tracing::warn!(
                    account_id = %account_id,
                    status = response.status,
                    attempt = attempt,
                    error = %e,
                    "Vendor API request failed"
                );
                return Err(e);
            }

            return Ok(ApiResponse {
                status: response.status,
                body: response.body,
            });
        }
    }

    /// Profile of `account_id`, from cache when possible.
    pub async fn profile(&self, account_id: &AccountId) -> Result<PersonProfile, UnavailableError> {
        if let Some(profile) = cached_profile(self.cache.as_ref(), account_id).await {
            return Ok(profile);
        }

        let settings = self.tokens.settings();
        let url = parse_url(&settings.profile_url)?;
        let profile: PersonProfile = self
            .authed_fetch(account_id, &ApiRequest::get(url))
            .await?
            .json()?;

        store_profile(self.cache.as_ref(), account_id, &profile, settings.profile_ttl).await;
        Ok(profile)
    }

    /// Recent public activities of `account_id`, or of the page `page_id`
    /// managed by that account.
    pub async fn activities(
        &self,
        account_id: &AccountId,
        page_id: Option<&str>,
        user_ip: Option<&str>,
    ) -> Result<ActivityPage, UnavailableError> {
        let owner = page_id.unwrap_or("me");
        let url = parse_url(&format!(
            "{}/people/{}/activities/public",
            self.api_base, owner
        ))?;

        let mut request =
            ApiRequest::get(url).query("maxResults", &self.max_results.to_string());
        if let Some(ip) = user_ip {
            request = request.query("userIp", ip);
        }

        self.authed_fetch(account_id, &request).await?.json()
    }
}

fn parse_url(raw: &str) -> Result<Url, UnavailableError> {
    Url::parse(raw).map_err(|e| {
        UnavailableError::new(
            UnavailableReason::Internal,
            format!("Invalid vendor API URL {raw:?}: {e}"),
        )
    })
}
