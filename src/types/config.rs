//! Configuration for identity resolution and document retry.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the identity resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum cosine distance at which a nearest-neighbor alias match is
    /// accepted as the same chemical (0 = identical).
    ///
    /// Nearest-neighbor matching is heuristic; this threshold is tunable
    /// and injected, never hardcoded at use sites. Default: 0.38, the
    /// operating point of the original corpus.
    pub similarity_threshold: f32,

    /// Dimension of name embeddings. Default: 1536.
    pub embedding_dim: usize,

    /// Capacity hint for the alias nearest-neighbor index.
    pub expected_aliases: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.38,
            embedding_dim: 1536,
            expected_aliases: 100_000,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the similarity threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the embedding dimension.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Set the expected alias count (index capacity hint).
    pub fn with_expected_aliases(mut self, count: usize) -> Self {
        self.expected_aliases = count;
        self
    }
}

/// Retry policy for transient store failures.
///
/// A `StoreUnavailable` aborts the whole document; retries replay the entire
/// document atomically, never a partial commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first. Default: 3.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt.
    pub initial_backoff_ms: u64,

    /// Ceiling for the backoff delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Backoff delay before the given retry (1-based), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::new().with_initial_backoff_ms(100);
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(10), Duration::from_millis(5_000));
    }
}
