use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vendor access tokens live an hour; a reported lifetime past a week is
/// clamped so the expiry arithmetic can never overflow.
const MAX_TOKEN_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;

/// Short-lived bearer credential with its absolute expiry.
#[derive(Debug)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self { secret, expires_at }
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Lifetime left at `now`; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub(crate) fn to_cache_value(&self) -> String {
        let cached = CachedToken {
            access_token: self.secret.expose_secret().to_string(),
            expires_at: self.expires_at.timestamp(),
        };
        // Serializing a struct of a String and an i64 cannot fail
        serde_json::to_string(&cached).unwrap_or_default()
    }

    /// Decode a cache entry, treating undecodable or already-expired values
    /// as a miss.
    pub(crate) fn from_cache_value(value: &str, now: DateTime<Utc>) -> Option<Self> {
        let cached: CachedToken = serde_json::from_str(value).ok()?;
        let expires_at = DateTime::from_timestamp(cached.expires_at, 0)?;
        if cached.access_token.is_empty() || expires_at <= now {
            return None;
        }
        Some(Self::new(SecretString::from(cached.access_token), expires_at))
    }
}

#[derive(Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Result of a successful token exchange.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    /// Only present when the vendor issued a new one
    pub refresh_token: Option<SecretString>,
    pub expires_in: Duration,
    /// Wall-clock time the exchange request was sent; expiry is measured from here
    pub issued_at: DateTime<Utc>,
}

impl TokenGrant {
    pub(crate) fn from_payload(payload: TokenPayload, issued_at: DateTime<Utc>) -> Self {
        let lifetime = payload.expires_in.min(MAX_TOKEN_LIFETIME_SECS);
        let expires_at = issued_at + chrono::Duration::seconds(lifetime as i64);
        Self {
            access_token: AccessToken::new(SecretString::from(payload.access_token), expires_at),
            refresh_token: payload
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            expires_in: Duration::from_secs(lifetime),
            issued_at,
        }
    }
}

// ============================================================================
// Token Endpoint Responses
// ============================================================================

/// Successful token endpoint body.
#[derive(Deserialize)]
pub(crate) struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
}

/// Why a token endpoint response was not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExchangeFailure {
    /// The grant (refresh token or authorization code) is permanently invalid
    InvalidGrant,
    /// Any other non-200 response
    Rejected { status: u16, error: Option<String> },
    /// Body was not the expected JSON shape
    Malformed(String),
    /// Token type other than Bearer
    UnexpectedTokenType(String),
}

/// Classify a token endpoint response.
///
/// `invalid_grant` is only recognised on 400/401, the statuses the vendor
/// uses for it; the same code on any other status is a plain rejection.
pub(crate) fn classify_token_response(
    status: u16,
    body: &[u8],
) -> Result<TokenPayload, ExchangeFailure> {
    if status != 200 {
        let error = serde_json::from_slice::<ErrorPayload>(body)
            .ok()
            .and_then(|p| p.error);
        if matches!(status, 400 | 401) && error.as_deref() == Some("invalid_grant") {
            return Err(ExchangeFailure::InvalidGrant);
        }
        return Err(ExchangeFailure::Rejected { status, error });
    }

    let payload: TokenPayload =
        serde_json::from_slice(body).map_err(|e| ExchangeFailure::Malformed(e.to_string()))?;

    if !payload.token_type.eq_ignore_ascii_case("bearer") {
        return Err(ExchangeFailure::UnexpectedTokenType(payload.token_type));
    }
    if payload.access_token.is_empty() {
        return Err(ExchangeFailure::Malformed("empty access_token".to_string()));
    }

    Ok(payload)
}
