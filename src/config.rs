//! Configuration file parser for atomgate.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! although the OAuth client id and secret have no usable default and must
//! come from the file (or, for the secret, from `ATOMGATE_CLIENT_SECRET`).
//! Unknown keys are accepted but logged as potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `oauth.client_secret`.
pub const CLIENT_SECRET_ENV: &str = "ATOMGATE_CLIENT_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// Every section and field uses `#[serde(default)]` so any subset of keys can
/// be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

/// `[oauth]`: client registration with the vendor.
///
/// SEC-015: Custom Debug impl masks `client_secret`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    /// Env var takes precedence over the config file
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:7587/oauth2callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://accounts.google.com/o/oauth2/token".to_string(),
            scope: "https://www.googleapis.com/auth/plus.me".to_string(),
        }
    }
}

impl OAuthConfig {
    /// Client secret from `ATOMGATE_CLIENT_SECRET`, else from the file.
    pub fn client_secret(&self) -> Option<SecretString> {
        std::env::var(CLIENT_SECRET_ENV)
            .ok()
            .or_else(|| self.client_secret.clone())
            .filter(|s| !s.is_empty())
            .map(SecretString::from)
    }
}

/// SEC-015: Mask client_secret in Debug output to prevent secret leakage.
impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .finish()
    }
}

/// `[api]`: the vendor's REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Applied to every outbound request, token exchanges included.
    pub timeout_secs: u64,
    /// Activities requested per feed.
    pub max_results: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/plus/v1".to_string(),
            timeout_secs: 5,
            max_results: 10,
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub profile_ttl_secs: u64,
    /// Rendered feeds
    pub stream_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: 24 * 60 * 60,
            stream_ttl_secs: 15 * 60,
            max_entries: 10_000,
        }
    }
}

/// `[limits]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub requests_per_minute: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: crate::ratelimit::DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public URL this proxy is reachable at; feed self-links and OAuth
    /// redirects are built from it.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7587".to_string(),
        }
    }
}

/// `[database]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("atomgate.db"),
        }
    }
}

const KNOWN_SECTIONS: [(&str, &[&str]); 6] = [
    (
        "oauth",
        &[
            "client_id",
            "client_secret",
            "redirect_uri",
            "auth_url",
            "token_url",
            "scope",
        ],
    ),
    ("api", &["base_url", "timeout_secs", "max_results"]),
    (
        "cache",
        &["profile_ttl_secs", "stream_ttl_secs", "max_entries"],
    ),
    ("limits", &["requests_per_minute"]),
    ("server", &["base_url"]),
    ("database", &["path"]),
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown sections or keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            server = %config.server.base_url,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (section, value) in raw {
        let Some((_, known_keys)) = KNOWN_SECTIONS.iter().find(|(name, _)| *name == section.as_str()) else {
            tracing::warn!(key = %section, "Unknown section in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for key in table.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
