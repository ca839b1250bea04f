use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use std::sync::Arc;
use thiserror::Error;

use super::profile::{fetch_profile, store_profile};
use super::tokens::{classify_token_response, ExchangeFailure, TokenPayload};
use super::{AccessToken, AccountId, OAuthSettings, PersonProfile, TokenGrant};
use crate::cache::{access_token_key, profile_key, ResultCache};
use crate::gateway::UnavailableError;
use crate::http::{self, HttpError};
use crate::storage::{DatabaseError, TokenStore};

/// Why no access token could be produced.
///
/// Every variant is an "absent" token to the caller; the variant only says
/// which state was (or was not) touched on the way.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Never authorized, or fully revoked earlier
    #[error("No refresh token stored for account {0}")]
    NoCredential(AccountId),
    /// The vendor reported the refresh token as invalid; all state for the
    /// account has been removed
    #[error("Access revoked for account {0}")]
    Revoked(AccountId),
    /// Authorization code was invalid, expired, or already used
    #[error("Grant rejected by the token endpoint (invalid_grant)")]
    InvalidGrant,
    #[error("Token endpoint timed out")]
    Timeout,
    #[error("Token endpoint returned HTTP {0}")]
    Rejected(u16),
    #[error("Token endpoint returned a malformed response: {0}")]
    Malformed(String),
    #[error("Token endpoint issued unexpected token type {0:?}")]
    UnexpectedTokenType(String),
    #[error("Token request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("Profile lookup failed: {0}")]
    Profile(#[source] UnavailableError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<HttpError> for TokenError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout => TokenError::Timeout,
            HttpError::Network(e) => TokenError::Network(e),
            HttpError::ResponseTooLarge => {
                TokenError::Malformed("response exceeded size limit".to_string())
            }
        }
    }
}

impl From<ExchangeFailure> for TokenError {
    fn from(failure: ExchangeFailure) -> Self {
        match failure {
            ExchangeFailure::InvalidGrant => TokenError::InvalidGrant,
            ExchangeFailure::Rejected { status, .. } => TokenError::Rejected(status),
            ExchangeFailure::Malformed(msg) => TokenError::Malformed(msg),
            ExchangeFailure::UnexpectedTokenType(kind) => TokenError::UnexpectedTokenType(kind),
        }
    }
}

/// Owns the access-token lifecycle for every account.
///
/// Holds no per-account locks: two requests missing the cache for the same
/// account both refresh, and the store's upsert keeps the last write.
pub struct TokenManager {
    client: reqwest::Client,
    settings: OAuthSettings,
    cache: Arc<dyn ResultCache>,
    store: Arc<dyn TokenStore>,
}

impl TokenManager {
    pub fn new(
        client: reqwest::Client,
        settings: OAuthSettings,
        cache: Arc<dyn ResultCache>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            client,
            settings,
            cache,
            store,
        }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Produce a currently valid access token for `account_id`.
    ///
    /// Cached tokens cost no network call; otherwise the stored refresh token
    /// is exchanged. An `invalid_grant` answer removes the cached token, the
    /// cached profile and the refresh token before returning
    /// [`TokenError::Revoked`]. Every other failure leaves all state as it was.
    pub async fn get_access_token(&self, account_id: &AccountId) -> Result<AccessToken, TokenError> {
        if let Some(token) = self.cached_access_token(account_id).await {
            tracing::trace!(account_id = %account_id, "Access token cache hit");
            return Ok(token);
        }

        let refresh_token = self
            .store
            .lookup(account_id)
            .await?
            .ok_or_else(|| TokenError::NoCredential(account_id.clone()))?;

        let issued_at = Utc::now();
        let result = self
            .exchange(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.expose_secret()),
                ("refresh_token", refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .await;

        let payload = match result {
            Ok(payload) => payload,
            Err(TokenError::InvalidGrant) => {
                tracing::info!(account_id = %account_id, "Refresh token revoked by user, forgetting account");
                if let Err(e) = self.revoke(account_id).await {
                    tracing::warn!(account_id = %account_id, error = %e, "Failed to remove revoked refresh token");
                }
                return Err(TokenError::Revoked(account_id.clone()));
            }
            Err(e) => {
                tracing::error!(account_id = %account_id, error = %e, "Access token refresh failed");
                return Err(e);
            }
        };

        let grant = TokenGrant::from_payload(payload, issued_at);
        if let Some(new_refresh) = &grant.refresh_token {
            // The current access token is still good if this write fails
            if let Err(e) = self.store.update(account_id, new_refresh).await {
                tracing::warn!(account_id = %account_id, error = %e, "Failed to store rotated refresh token");
            }
        }
        self.cache_access_token(account_id, &grant.access_token).await;

        tracing::debug!(
            account_id = %account_id,
            expires_in = grant.expires_in.as_secs(),
            "Refreshed access token"
        );
        Ok(grant.access_token)
    }

    /// Exchange a one-time authorization code for tokens.
    ///
    /// Nothing is cached or stored here: the tokens are not yet associated
    /// with an account. An `invalid_grant` answer means the code was invalid,
    /// expired or reused and surfaces as [`TokenError::InvalidGrant`].
    pub async fn acquire_from_authorization_code(&self, code: &str) -> Result<TokenGrant, TokenError> {
        let issued_at = Utc::now();
        let payload = self
            .exchange(&[
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.expose_secret()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Authorization code exchange failed");
            })?;

        Ok(TokenGrant::from_payload(payload, issued_at))
    }

    /// Finish the OAuth2 flow for an authorization `code`.
    ///
    /// Exchanges the code, looks up who the tokens belong to, stores the
    /// refresh token under that account and caches the access token for what
    /// is left of its lifetime, measured from when the exchange was sent.
    pub async fn complete_authorization(&self, code: &str) -> Result<PersonProfile, TokenError> {
        let grant = self.acquire_from_authorization_code(code).await?;

        let profile = fetch_profile(
            &self.client,
            &self.settings.profile_url,
            &grant.access_token,
            self.settings.timeout,
        )
        .await
        .map_err(TokenError::Profile)?;
        let account_id = AccountId::new(profile.id.clone())
            .ok_or_else(|| TokenError::Malformed("profile has an empty id".to_string()))?;

        store_profile(
            self.cache.as_ref(),
            &account_id,
            &profile,
            self.settings.profile_ttl,
        )
        .await;

        match &grant.refresh_token {
            Some(refresh_token) => self.store.update(&account_id, refresh_token).await?,
            None => tracing::warn!(
                account_id = %account_id,
                "No refresh token issued; feed access ends when the access token expires"
            ),
        }

        self.cache_access_token(&account_id, &grant.access_token).await;

        tracing::info!(account_id = %account_id, "Successfully authorized account");
        Ok(profile)
    }

    /// Drop the cached access token so the next lookup refreshes.
    pub async fn invalidate(&self, account_id: &AccountId) {
        self.cache.delete(&access_token_key(account_id)).await;
    }

    /// Forget everything held for `account_id`. Idempotent.
    pub async fn revoke(&self, account_id: &AccountId) -> Result<(), DatabaseError> {
        self.cache.delete(&access_token_key(account_id)).await;
        self.cache.delete(&profile_key(account_id)).await;
        self.store.remove(account_id).await
    }

    /// Whether a refresh token is on file for `account_id`.
    pub async fn is_authorized(&self, account_id: &AccountId) -> Result<bool, DatabaseError> {
        Ok(self.store.lookup(account_id).await?.is_some())
    }

    async fn cached_access_token(&self, account_id: &AccountId) -> Option<AccessToken> {
        let value = self.cache.get(&access_token_key(account_id)).await?;
        AccessToken::from_cache_value(&value, Utc::now())
    }

    /// Cache `token` for its remaining lifetime; a token with nothing left is
    /// not cached at all.
    async fn cache_access_token(&self, account_id: &AccountId, token: &AccessToken) {
        let ttl = token.remaining(Utc::now());
        if ttl.is_zero() {
            tracing::warn!(account_id = %account_id, "Access token expired before it could be cached");
            return;
        }
        self.cache
            .set(&access_token_key(account_id), token.to_cache_value(), ttl)
            .await;
    }

    async fn exchange(&self, params: &[(&str, &str)]) -> Result<TokenPayload, TokenError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let request = self
            .client
            .post(&self.settings.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);

        let response = http::send(request, self.settings.timeout).await?;
        classify_token_response(response.status, &response.body).map_err(|failure| {
            if let ExchangeFailure::Rejected { status, error } = &failure {
                tracing::warn!(status = status, error = ?error, "Token endpoint rejected request");
            }
            TokenError::from(failure)
        })
    }
}
