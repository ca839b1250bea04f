//! Fixed-window request limiting per remote address.
//!
//! The counter lives in the shared [`ResultCache`] so the window survives
//! across handlers. The first request of a window sets the counter with a
//! TTL; later requests only increment it, so the window never slides.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ratelimit_key, ResultCache};

pub const DEFAULT_REQUESTS_PER_MINUTE: i64 = 60;
pub const WINDOW: Duration = Duration::from_secs(60);

/// Rejected counts that get logged, besides the first one over the limit.
const LOG_MILESTONES: [i64; 3] = [100, 1_000, 10_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: i64 },
    Rejected { count: i64, retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// HTTP status for a rejection.
    pub fn status(&self) -> u16 {
        match self {
            Admission::Admitted { .. } => 200,
            Admission::Rejected { .. } => 503,
        }
    }
}

pub struct RateLimiter {
    cache: Arc<dyn ResultCache>,
    limit: i64,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn ResultCache>, limit: i64) -> Self {
        Self {
            cache,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Count one request from `remote` and decide whether to serve it.
    pub async fn check_and_increment(&self, remote: &str) -> Admission {
        let key = ratelimit_key(remote);
        let count = match self.cache.incr(&key).await {
            Some(count) => count,
            None => {
                self.cache.set(&key, "1".to_string(), WINDOW).await;
                1
            }
        };

        if count <= self.limit {
            return Admission::Admitted { count };
        }

        if should_log(count, self.limit) {
            tracing::info!(
                remote = %remote,
                requests = count,
                "Rate limited remote address"
            );
        }
        Admission::Rejected {
            count,
            retry_after: WINDOW,
        }
    }
}

/// Whether a rejected `count` is worth a log line.
fn should_log(count: i64, limit: i64) -> bool {
    count == limit + 1 || LOG_MILESTONES.contains(&count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use pretty_assertions::assert_eq;

    fn limiter(limit: i64) -> (RateLimiter, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::default());
        (RateLimiter::new(cache.clone(), limit), cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixty_admitted_sixty_first_rejected() {
        let (limiter, _) = limiter(DEFAULT_REQUESTS_PER_MINUTE);
        for expected in 1..=60 {
            assert_eq!(
                limiter.check_and_increment("10.0.0.1").await,
                Admission::Admitted { count: expected }
            );
        }
        let rejected = limiter.check_and_increment("10.0.0.1").await;
        assert_eq!(
            rejected,
            Admission::Rejected {
                count: 61,
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(rejected.status(), 503);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_sixty_seconds() {
        let (limiter, _) = limiter(2);
        assert!(limiter.check_and_increment("a").await.is_admitted());
        assert!(limiter.check_and_increment("a").await.is_admitted());
        assert!(!limiter.check_and_increment("a").await.is_admitted());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            limiter.check_and_increment("a").await,
            Admission::Admitted { count: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_increments_do_not_extend_window() {
        let (limiter, cache) = limiter(DEFAULT_REQUESTS_PER_MINUTE);
        limiter.check_and_increment("b").await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_and_increment("b").await;

        let ttl = cache.ttl(&ratelimit_key("b")).unwrap();
        assert!(ttl <= Duration::from_secs(30));
    }

    #[test]
    fn test_rejections_logged_only_at_milestones() {
        let logged: Vec<i64> = (61..=20_000).filter(|&n| should_log(n, 60)).collect();
        assert_eq!(logged, vec![61, 100, 1_000, 10_000]);
    }

    #[test]
    fn test_first_rejection_follows_configured_limit() {
        assert!(should_log(6, 5));
        assert!(!should_log(7, 5));
        assert!(should_log(100, 5));
    }

    #[tokio::test]
    async fn test_addresses_are_counted_separately() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check_and_increment("a").await.is_admitted());
        assert!(limiter.check_and_increment("b").await.is_admitted());
        assert!(!limiter.check_and_increment("a").await.is_admitted());
    }
}
