//! Volatile key/value cache shared by every request.
//!
//! - [`ResultCache`] - the interface the token manager, gateway, rate limiter
//!   and feed handler program against
//! - [`MemoryCache`] - in-process implementation over an LRU map with
//!   per-entry TTLs
//!
//! Keys are namespaced by the helpers below so each owner only ever touches
//! its own entries.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use std::time::Duration;

use crate::auth::AccountId;

/// Shared TTL-capable cache.
///
/// Backend failures degrade to a miss (`None`) or a dropped write; callers
/// never lock around these operations.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Deleting a missing key is a no-op.
    async fn delete(&self, key: &str);

    /// Atomically increments an existing integer entry without touching its
    /// TTL. Returns `None` when the key is absent or expired; the caller then
    /// decides whether to start a new entry.
    async fn incr(&self, key: &str) -> Option<i64>;
}

pub fn access_token_key(account_id: &AccountId) -> String {
    format!("access-token:{account_id}")
}

pub fn profile_key(account_id: &AccountId) -> String {
    format!("profile:{account_id}")
}

pub fn ratelimit_key(remote_addr: &str) -> String {
    format!("ratelimit:{remote_addr}")
}

/// Rendered feed body, per account and optional page.
pub fn atom_key(account_id: &AccountId, page_id: Option<&str>) -> String {
    match page_id {
        Some(page) => format!("atom:{account_id}-{page}"),
        None => format!("atom:{account_id}"),
    }
}
