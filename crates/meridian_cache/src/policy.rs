//! Cache policies: TTLs and per-route timeouts.

use derive_getters::Getters;
use rand::Rng;
use std::time::Duration;

/// How long a cache entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Always the same TTL
    Fixed(Duration),
    /// Uniformly drawn from `[min, max]` to smear expiry across keys
    Jitter {
        /// Lower bound
        min: Duration,
        /// Upper bound (inclusive)
        max: Duration,
    },
}

impl Ttl {
    /// Fixed TTL in seconds.
    pub const fn secs(secs: u64) -> Self {
        Ttl::Fixed(Duration::from_secs(secs))
    }

    /// Jittered TTL between two bounds in seconds.
    pub const fn between(min_secs: u64, max_secs: u64) -> Self {
        Ttl::Jitter {
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Draw a concrete TTL.
    pub fn sample(&self) -> Duration {
        match *self {
            Ttl::Fixed(d) => d,
            Ttl::Jitter { min, max } if max <= min => min,
            Ttl::Jitter { min, max } => {
                let secs = rand::thread_rng().gen_range(min.as_secs()..=max.as_secs());
                Duration::from_secs(secs)
            }
        }
    }
}

/// Caching behaviour of one handler.
#[derive(Debug, Clone, Getters, derive_setters::Setters, derive_builder::Builder)]
#[setters(prefix = "with_")]
pub struct CachePolicy {
    /// TTL of successful results
    ttl: Ttl,
    /// TTL of negative entries; `None` disables negative caching
    #[builder(default = "Some(Ttl::secs(3600))")]
    negative_ttl: Option<Ttl>,
    /// Deadline for the wrapped fetch
    #[builder(default = "Duration::from_secs(30)")]
    timeout: Duration,
}

impl CachePolicy {
    /// Policy with the given TTL, a one-hour negative TTL, and a 30s timeout.
    pub fn new(ttl: Ttl) -> Self {
        Self {
            ttl,
            negative_ttl: Some(Ttl::secs(3600)),
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_within_bounds() {
        let ttl = Ttl::between(1200, 1800);
        for _ in 0..200 {
            let d = ttl.sample();
            assert!(d >= Duration::from_secs(1200) && d <= Duration::from_secs(1800));
        }
    }

    #[test]
    fn test_degenerate_jitter_is_min() {
        assert_eq!(Ttl::between(10, 5).sample(), Duration::from_secs(10));
        assert_eq!(Ttl::secs(7).sample(), Duration::from_secs(7));
    }

    #[test]
    fn test_builder_defaults() {
        let policy = CachePolicyBuilder::default()
            .ttl(Ttl::secs(7200))
            .build()
            .unwrap();
        assert_eq!(*policy.timeout(), Duration::from_secs(30));
        assert_eq!(*policy.negative_ttl(), Some(Ttl::secs(3600)));
    }
}
