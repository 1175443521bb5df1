//! Per-account limiter using governor and Tokio semaphores.
//!
//! - Requests per minute are enforced with governor's GCRA limiter. A request
//!   over the limit is rejected immediately rather than queued.
//! - Concurrency per platform is enforced with one semaphore per platform,
//!   created on first use with the account's override or the platform default.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Concurrent fetches one account may run against a platform by default.
pub fn default_platform_limit(platform: &str) -> u32 {
    match platform.to_ascii_lowercase().as_str() {
        "instagram" => 2,
        "tiktok" => 5,
        _ => 4,
    }
}

/// Limits held for one account.
pub struct AccountLimiter {
    rpm_limiter: Option<Arc<DirectRateLimiter>>,
    overrides: HashMap<String, u32>,
    restricted: Vec<String>,
    platforms: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl std::fmt::Debug for AccountLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLimiter")
            .field("rpm", &self.rpm_limiter.is_some())
            .field("overrides", &self.overrides)
            .field("restricted", &self.restricted)
            .finish()
    }
}

impl AccountLimiter {
    /// Create limits for an account.
    ///
    /// `restricted` platforms get a concurrency of one regardless of overrides.
    pub fn new(rpm: Option<u32>, overrides: HashMap<String, u32>, restricted: Vec<String>) -> Self {
        let rpm_limiter = rpm.and_then(NonZeroU32::new).map(|n| {
            let quota = Quota::per_minute(n);
            Arc::new(GovernorRateLimiter::direct(quota))
        });
        Self {
            rpm_limiter,
            overrides,
            restricted,
            platforms: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request against the per-minute limit.
    pub fn check_rate(&self) -> bool {
        self.rpm_limiter
            .as_ref()
            .is_none_or(|limiter| limiter.check().is_ok())
    }

    /// Concurrency cap applied to `platform`.
    pub fn platform_limit(&self, platform: &str) -> u32 {
        let key = platform.to_ascii_lowercase();
        if self.restricted.iter().any(|p| p.eq_ignore_ascii_case(&key)) {
            return 1;
        }
        self.overrides
            .get(&key)
            .copied()
            .unwrap_or_else(|| default_platform_limit(&key))
            .max(1)
    }

    fn semaphore(&self, platform: &str) -> Arc<Semaphore> {
        let key = platform.to_ascii_lowercase();
        let limit = self.platform_limit(&key) as usize;
        self.platforms
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone()
    }

    /// Wait for a concurrency slot on `platform`.
    pub async fn acquire_platform(&self, platform: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(platform).acquire_owned().await.ok()
    }

    /// Free slots on `platform`.
    pub fn available(&self, platform: &str) -> usize {
        self.semaphore(platform).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        let limiter = AccountLimiter::new(None, HashMap::new(), Vec::new());
        assert_eq!(limiter.platform_limit("instagram"), 2);
        assert_eq!(limiter.platform_limit("TikTok"), 5);
        assert_eq!(limiter.platform_limit("pinterest"), 4);
    }

    #[test]
    fn test_overrides_and_restrictions() {
        let mut overrides = HashMap::new();
        overrides.insert("tiktok".to_string(), 9);
        let limiter = AccountLimiter::new(None, overrides, vec!["instagram".into()]);
        assert_eq!(limiter.platform_limit("tiktok"), 9);
        assert_eq!(limiter.platform_limit("instagram"), 1);
    }

    #[test]
    fn test_rpm_rejects_burst() {
        let limiter = AccountLimiter::new(Some(2), HashMap::new(), Vec::new());
        let allowed = (0..10).filter(|_| limiter.check_rate()).count();
        assert!(allowed >= 1 && allowed <= 2);
    }
}
