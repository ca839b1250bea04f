//! Shared fixtures: a wiremock vendor, an in-memory cache and a SQLite
//! token store wired together the way `App` wires them.
#![allow(dead_code)]

use chrono::Utc;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

use atomgate::auth::{AccountId, OAuthSettings, TokenManager};
use atomgate::cache::{access_token_key, MemoryCache, ResultCache};
use atomgate::feed::AtomRenderer;
use atomgate::gateway::FetchGateway;
use atomgate::ratelimit::RateLimiter;
use atomgate::service::FeedService;
use atomgate::storage::{Database, TokenStore};

pub const ACCOUNT: &str = "123456789012345678901";
pub const PAGE: &str = "999999999999999999999";

/// Deadline for every vendor call in tests; mocks that should time out
/// delay longer than this.
pub const TIMEOUT: Duration = Duration::from_secs(2);

pub fn account() -> AccountId {
    AccountId::new(ACCOUNT).unwrap()
}

pub fn settings(server: &MockServer) -> OAuthSettings {
    OAuthSettings {
        client_id: "client-id".to_string(),
        client_secret: SecretString::from("client-secret".to_string()),
        redirect_uri: "https://feeds.example.com/oauth2callback".to_string(),
        auth_url: format!("{}/auth", server.uri()),
        token_url: format!("{}/token", server.uri()),
        profile_url: format!("{}/people/me", server.uri()),
        scope: "profile".to_string(),
        timeout: TIMEOUT,
        profile_ttl: Duration::from_secs(3600),
    }
}

/// Successful token endpoint body.
pub fn token_body(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    body
}

pub fn profile_body(id: &str, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "displayName": name,
        "url": format!("https://plus.example.com/{id}"),
        "image": {"url": format!("https://img.example.com/{id}.png")},
    })
}

pub struct Harness {
    pub server: MockServer,
    pub cache: Arc<MemoryCache>,
    pub db: Database,
    pub tokens: Arc<TokenManager>,
    pub gateway: Arc<FetchGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_db(Database::open(":memory:").await.unwrap()).await
    }

    pub async fn with_db(db: Database) -> Self {
        let server = MockServer::start().await;
        let cache = Arc::new(MemoryCache::default());
        let client = reqwest::Client::new();

        let tokens = Arc::new(TokenManager::new(
            client.clone(),
            settings(&server),
            cache.clone(),
            Arc::new(db.clone()),
        ));
        let gateway = Arc::new(FetchGateway::new(
            client,
            tokens.clone(),
            cache.clone(),
            server.uri(),
            10,
        ));

        Self {
            server,
            cache,
            db,
            tokens,
            gateway,
        }
    }

    pub fn service(&self, requests_per_minute: i64) -> FeedService {
        FeedService::new(
            self.tokens.clone(),
            self.gateway.clone(),
            Arc::new(RateLimiter::new(self.cache.clone(), requests_per_minute)),
            self.cache.clone(),
            Arc::new(AtomRenderer),
            "https://feeds.example.com",
            Duration::from_secs(900),
        )
    }

    /// Store a refresh token for [`ACCOUNT`].
    pub async fn store_refresh_token(&self, refresh_token: &str) {
        self.db
            .update(&account(), &SecretString::from(refresh_token.to_string()))
            .await
            .unwrap();
    }

    pub async fn stored_refresh_token(&self) -> Option<String> {
        use secrecy::ExposeSecret;
        self.db
            .lookup(&account())
            .await
            .unwrap()
            .map(|t| t.expose_secret().to_string())
    }

    /// Put an access token for [`ACCOUNT`] in the cache, valid for an hour.
    pub async fn cache_access_token(&self, access_token: &str) {
        let value = json!({
            "access_token": access_token,
            "expires_at": Utc::now().timestamp() + 3600,
        });
        self.cache
            .set(
                &access_token_key(&account()),
                value.to_string(),
                Duration::from_secs(3600),
            )
            .await;
    }
}
