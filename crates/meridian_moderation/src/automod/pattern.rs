//! Time-bounded evaluation of guild-defined patterns.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

/// Result of running one pattern against one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexOutcome {
    /// The pattern matched
    Matched,
    /// The pattern did not match
    NoMatch,
    /// Evaluation exceeded its budget
    TimedOut,
    /// The pattern does not compile
    Invalid,
}

/// Compiled patterns, shared by every guild.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl RegexCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, pattern: &str) -> Option<Regex> {
        let mut compiled = self.compiled.lock();
        if let Some(regex) = compiled.get(pattern) {
            return Some(regex.clone());
        }
        match Regex::new(pattern) {
            Ok(regex) => {
                compiled.insert(pattern.to_string(), regex.clone());
                Some(regex)
            }
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Automod pattern does not compile");
                None
            }
        }
    }

    /// Match `content` on the blocking pool, giving up after `budget`.
    pub async fn evaluate(&self, pattern: &str, content: &str, budget: Duration) -> RegexOutcome {
        let Some(regex) = self.compile(pattern) else {
            return RegexOutcome::Invalid;
        };
        let content = content.to_string();
        let search = tokio::task::spawn_blocking(move || regex.is_match(&content));
        match tokio::time::timeout(budget, search).await {
            Ok(Ok(true)) => RegexOutcome::Matched,
            Ok(Ok(false)) => RegexOutcome::NoMatch,
            Ok(Err(e)) => {
                tracing::error!(pattern, error = %e, "Automod pattern evaluation panicked");
                RegexOutcome::NoMatch
            }
            Err(_) => RegexOutcome::TimedOut,
        }
    }

    /// Drop a compiled pattern.
    pub fn evict(&self, pattern: &str) {
        self.compiled.lock().remove(pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluate_outcomes() {
        let cache = RegexCache::new();
        let budget = Duration::from_secs(1);
        assert_eq!(
            cache.evaluate(r"discord\.gg/\w+", "join discord.gg/abc", budget).await,
            RegexOutcome::Matched
        );
        assert_eq!(
            cache.evaluate(r"discord\.gg/\w+", "hello", budget).await,
            RegexOutcome::NoMatch
        );
        assert_eq!(cache.evaluate("(unclosed", "x", budget).await, RegexOutcome::Invalid);
    }

    #[tokio::test]
    async fn test_compiled_patterns_are_reused() {
        let cache = RegexCache::new();
        cache.evaluate("a+", "aaa", Duration::from_secs(1)).await;
        assert_eq!(cache.compiled.lock().len(), 1);
        cache.evaluate("a+", "b", Duration::from_secs(1)).await;
        assert_eq!(cache.compiled.lock().len(), 1);
        cache.evict("a+");
        assert!(cache.compiled.lock().is_empty());
    }
}
