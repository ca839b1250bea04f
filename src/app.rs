use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{OAuthSettings, TokenManager};
use crate::cache::{MemoryCache, ResultCache};
use crate::config::Config;
use crate::feed::AtomRenderer;
use crate::gateway::FetchGateway;
use crate::ratelimit::RateLimiter;
use crate::service::FeedService;
use crate::storage::Database;

// ============================================================================
// HTTP Client Configuration
// ============================================================================

/// Shared client for every vendor call.
///
/// The token endpoint and the API answer directly, so redirects are never
/// followed. Per-request deadlines come from `api.timeout_secs`; the client
/// timeout only backs them up.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .user_agent(concat!("atomgate/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(timeout * 2)
        .build()
        .context("Failed to build HTTP client")?;
    Ok(client)
}

// ============================================================================
// Application Wiring
// ============================================================================

/// Every long-lived component, wired together once at startup.
pub struct App {
    pub db: Database,
    pub tokens: Arc<TokenManager>,
    pub gateway: Arc<FetchGateway>,
    pub service: FeedService,
}

impl App {
    /// Open the token database named in `config` and wire the components.
    pub async fn open(config: &Config) -> Result<Self> {
        let path = config
            .database
            .path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
        let db = Database::open(path)
            .await
            .with_context(|| format!("Failed to open database at {path}"))?;
        Self::with_database(config, db)
    }

    /// Wire the components around an already-open database.
    pub fn with_database(config: &Config, db: Database) -> Result<Self> {
        let settings = OAuthSettings::from_config(config).context("Incomplete OAuth configuration")?;
        let client = build_http_client(settings.timeout)?;

        let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new(config.cache.max_entries));
        let tokens = Arc::new(TokenManager::new(
            client.clone(),
            settings,
            cache.clone(),
            Arc::new(db.clone()),
        ));
        let gateway = Arc::new(FetchGateway::new(
            client,
            tokens.clone(),
            cache.clone(),
            config.api.base_url.clone(),
            config.api.max_results,
        ));
        let limiter = Arc::new(RateLimiter::new(
            cache.clone(),
            config.limits.requests_per_minute,
        ));
        let service = FeedService::new(
            tokens.clone(),
            gateway.clone(),
            limiter,
            cache,
            Arc::new(AtomRenderer),
            config.server.base_url.clone(),
            Duration::from_secs(config.cache.stream_ttl_secs),
        );

        Ok(Self {
            db,
            tokens,
            gateway,
            service,
        })
    }
}
