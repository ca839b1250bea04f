//! Request handlers, independent of any web framework.
//!
//! Each handler takes the already-extracted request inputs and returns a
//! [`HandlerResponse`] that a server layer can copy onto the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::{AccountId, TokenError, TokenManager};
use crate::cache::{atom_key, ResultCache};
use crate::feed::{FeedItem, FeedMeta, FeedRenderer};
use crate::gateway::{FetchGateway, UnavailableError};
use crate::ratelimit::{Admission, RateLimiter};

pub const ACCOUNT_COOKIE: &str = "account_id";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HandlerResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
            body: body.into(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".to_string(), location.into())],
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// First value of header `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn unavailable(err: &UnavailableError) -> Self {
        let response = Self::text(err.status, err.message.clone());
        match err.retry_after() {
            Some(after) => response.with_header("Retry-After", after.as_secs().to_string()),
            None => response,
        }
    }
}

/// Rendered feed as kept in the cache.
#[derive(Serialize, Deserialize)]
struct CachedFeed {
    body: String,
    last_modified: String,
}

// ============================================================================
// Service
// ============================================================================

pub struct FeedService {
    tokens: Arc<TokenManager>,
    gateway: Arc<FetchGateway>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResultCache>,
    renderer: Arc<dyn FeedRenderer>,
    server_base: String,
    stream_ttl: Duration,
}

impl FeedService {
    pub fn new(
        tokens: Arc<TokenManager>,
        gateway: Arc<FetchGateway>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
        renderer: Arc<dyn FeedRenderer>,
        server_base: impl Into<String>,
        stream_ttl: Duration,
    ) -> Self {
        Self {
            tokens,
            gateway,
            limiter,
            cache,
            renderer,
            server_base: server_base.into().trim_end_matches('/').to_string(),
            stream_ttl,
        }
    }

    /// Vendor URL that starts the authorization flow with offline access, so
    /// a refresh token is issued.
    pub fn authorize_url(&self) -> Result<Url, url::ParseError> {
        let settings = self.tokens.settings();
        Url::parse_with_params(
            &settings.auth_url,
            &[
                ("client_id", settings.client_id.as_str()),
                ("redirect_uri", settings.redirect_uri.as_str()),
                ("scope", settings.scope.as_str()),
                ("response_type", "code"),
                ("access_type", "offline"),
                ("approval_prompt", "force"),
            ],
        )
    }

    /// `GET /auth`
    pub fn authorize(&self) -> HandlerResponse {
        match self.authorize_url() {
            Ok(url) => HandlerResponse::redirect(url.as_str()),
            Err(e) => {
                tracing::error!(error = %e, "Invalid authorization endpoint");
                HandlerResponse::text(500, "Authorization endpoint is misconfigured.")
            }
        }
    }

    /// `GET /` with the value of the account cookie, if any.
    ///
    /// A cookie whose account no longer has a stored refresh token is sent to
    /// [`clear`](Self::clear).
    pub async fn home(&self, cookie: Option<&str>) -> HandlerResponse {
        let Some(raw) = cookie.filter(|c| !c.is_empty()) else {
            return HandlerResponse::text(
                200,
                format!("Authorize at {}/auth to get your feed URL.", self.server_base),
            );
        };
        let Some(id) = AccountId::new(raw) else {
            return HandlerResponse::redirect(format!("{}/clear", self.server_base));
        };

        match self.tokens.is_authorized(&id).await {
            Ok(true) => HandlerResponse::text(
                200,
                format!("Your feed URL: {}/atom/{}", self.server_base, id),
            ),
            Ok(false) => {
                tracing::debug!(account_id = %id, "Cookie for unauthorized account");
                HandlerResponse::redirect(format!("{}/clear", self.server_base))
            }
            Err(e) => {
                tracing::error!(account_id = %id, error = %e, "Failed to look up credential");
                HandlerResponse::text(500, "Unable to check your authorization. Please try again later.")
            }
        }
    }

    /// `GET /clear`: expire the account cookie and go back home.
    pub fn clear(&self) -> HandlerResponse {
        HandlerResponse::redirect(format!("{}/", self.server_base))
            .with_header("Set-Cookie", format!("{ACCOUNT_COOKIE}=; Max-Age=0; Path=/"))
    }

    /// `GET /access_denied`
    pub fn access_denied(&self) -> HandlerResponse {
        HandlerResponse::text(
            200,
            format!(
                "Authorization was declined, so no feed can be made. Start over at {}/auth.",
                self.server_base
            ),
        )
    }

    /// `GET /oauth2callback?error=..&code=..`
    pub async fn oauth_callback(&self, error: Option<&str>, code: Option<&str>) -> HandlerResponse {
        match error {
            Some("access_denied") => {
                return HandlerResponse::redirect(format!("{}/access_denied", self.server_base));
            }
            Some(other) => {
                tracing::warn!(error = %other, "OAuth2 callback received error");
                return HandlerResponse::text(
                    500,
                    "Something went wrong during authorization. Please try again later.",
                );
            }
            None => {}
        }

        let Some(code) = code.filter(|c| !c.is_empty()) else {
            return HandlerResponse::text(400, "Authorization code is missing.");
        };

        match self.tokens.complete_authorization(code).await {
            Ok(profile) => HandlerResponse::redirect(format!("{}/", self.server_base)).with_header(
                "Set-Cookie",
                format!("{ACCOUNT_COOKIE}={}; Path=/; HttpOnly", profile.id),
            ),
            Err(e) => {
                let (status, message) = callback_failure(&e);
                tracing::error!(error = %e, status = status, "Unable to finish OAuth2 flow");
                HandlerResponse::text(status, message)
            }
        }
    }

    /// `GET /atom/{account_id}` and `GET /atom/{account_id}/{page_id}`
    pub async fn atom(
        &self,
        remote_addr: &str,
        account_id: &str,
        page_id: Option<&str>,
    ) -> HandlerResponse {
        let admission = self.limiter.check_and_increment(remote_addr).await;
        if let Admission::Rejected { retry_after, .. } = admission {
            return HandlerResponse::text(
                admission.status(),
                format!(
                    "Rate limit exceeded. Please do not make more than {} requests per minute.",
                    self.limiter.limit()
                ),
            )
            .with_header("Retry-After", retry_after.as_secs().to_string());
        }

        self.feed(account_id, page_id, Some(remote_addr)).await
    }

    /// Serve a feed without the rate gate. `user_ip` is forwarded to the
    /// vendor for its per-user quota when the request came from a client.
    pub async fn feed(
        &self,
        account_id: &str,
        page_id: Option<&str>,
        user_ip: Option<&str>,
    ) -> HandlerResponse {
        let id = match AccountId::new(account_id).filter(|_| AccountId::is_canonical(account_id)) {
            Some(id) => id,
            None => return HandlerResponse::text(404, "Invalid account ID (must be exactly 21 digits)."),
        };
        if page_id.is_some_and(|page| !AccountId::is_canonical(page)) {
            return HandlerResponse::text(404, "Invalid page ID (must be exactly 21 digits).");
        }

        let key = atom_key(&id, page_id);
        if let Some(cached) = self.cached_feed(&key).await {
            return self.feed_response(cached);
        }

        let page = match self.gateway.activities(&id, page_id, user_ip).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(account_id = %id, error = %e, "Feed request failed");
                return HandlerResponse::unavailable(&e);
            }
        };

        let now = Utc::now();
        let items: Vec<FeedItem> = page
            .items
            .iter()
            .map(|activity| FeedItem::from_activity(activity, now))
            .collect();
        let meta = self.feed_meta(&id, page_id, &items, now);

        let body = match self.renderer.render(&meta, &items) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(account_id = %id, error = %e, "Failed to render feed");
                return HandlerResponse::text(500, "Failed to render feed.");
            }
        };

        let feed = CachedFeed {
            body,
            last_modified: meta.updated.format(HTTP_DATE_FORMAT).to_string(),
        };
        match serde_json::to_string(&feed) {
            Ok(value) => self.cache.set(&key, value, self.stream_ttl).await,
            Err(e) => tracing::warn!(error = %e, "Failed to serialize feed for caching"),
        }

        tracing::debug!(account_id = %id, items = items.len(), "Rendered feed");
        self.feed_response(feed)
    }

    async fn cached_feed(&self, key: &str) -> Option<CachedFeed> {
        let value = self.cache.get(key).await?;
        serde_json::from_str(&value).ok()
    }

    fn feed_response(&self, feed: CachedFeed) -> HandlerResponse {
        HandlerResponse {
            status: 200,
            headers: vec![
                ("Content-Type".to_string(), self.renderer.content_type().to_string()),
                ("Last-Modified".to_string(), feed.last_modified),
            ],
            body: feed.body,
        }
    }

    fn feed_meta(
        &self,
        id: &AccountId,
        page_id: Option<&str>,
        items: &[FeedItem],
        now: DateTime<Utc>,
    ) -> FeedMeta {
        let self_link = match page_id {
            Some(page) => format!("{}/atom/{}/{}", self.server_base, id, page),
            None => format!("{}/atom/{}", self.server_base, id),
        };
        let first = items.first();
        let author = first.and_then(|item| item.author.clone());
        let alternate_link = author
            .as_ref()
            .and_then(|a| a.url.clone())
            .unwrap_or_else(|| self_link.clone());
        let title = match &author {
            Some(a) => format!("{} - Public Posts", a.name),
            None => page_id.unwrap_or(id.as_str()).to_string(),
        };

        FeedMeta {
            id: alternate_link.clone(),
            title,
            alternate_link,
            self_link,
            updated: items.iter().map(|i| i.updated).max().unwrap_or(now),
            author,
        }
    }
}

/// Status and user-facing message for a failed authorization code exchange.
fn callback_failure(err: &TokenError) -> (u16, &'static str) {
    match err {
        TokenError::Timeout => (
            504,
            "The vendor took too long to respond. Please try again later.",
        ),
        TokenError::InvalidGrant
        | TokenError::Rejected(_)
        | TokenError::NoCredential(_)
        | TokenError::Revoked(_) => (
            401,
            "We failed to finish processing your authorization. Please try again later.",
        ),
        TokenError::Malformed(_)
        | TokenError::UnexpectedTokenType(_)
        | TokenError::Network(_)
        | TokenError::Profile(_) => (
            502,
            "We got an invalid response for your authorization. Please try again later.",
        ),
        TokenError::Store(_) => (500, "Unable to save your authorization. Please try again later."),
    }
}
