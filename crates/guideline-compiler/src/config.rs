//! Configuration types for the guideline compiler.

use std::time::Duration;

use guideline_criteria::Vocabulary;

use crate::error::{CompilerError, CompilerResult};
use crate::retry::RetryPolicy;

/// Default number of concurrent normalizer calls.
pub const DEFAULT_WORKERS: usize = 4;

/// Configuration for the guideline compiler.
///
/// # Example
///
/// ```rust
/// use guideline_compiler::{CacheConfig, CompilerConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = CompilerConfig::builder()
///     .with_workers(8)
///     .with_timeout(Duration::from_secs(120))
///     .with_retry(RetryPolicy::default())
///     .with_cache(CacheConfig::default())
///     .with_minimum_criteria_count(1)
///     .build();
///
/// assert_eq!(config.workers, 8);
/// ```
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Maximum number of concurrent normalizer calls.
    pub workers: usize,
    /// Budget for the whole normalization run (None = no timeout).
    pub timeout: Option<Duration>,
    /// Retry policy for retryable normalizer errors.
    pub retry: RetryPolicy,
    /// Cache configuration (None = caching disabled).
    pub cache: Option<CacheConfig>,
    /// Minimum number of met criteria that indicates admission.
    pub minimum_criteria_count: usize,
    /// Whether alternatives to admission are parsed and emitted.
    pub include_alternatives: bool,
    /// Vocabulary tables used by extraction and compilation.
    pub vocabulary: Vocabulary,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout: None,
            retry: RetryPolicy::default(),
            cache: None,
            minimum_criteria_count: 1,
            include_alternatives: true,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl CompilerConfig {
    /// Creates a new builder for CompilerConfig.
    pub fn builder() -> CompilerConfigBuilder {
        CompilerConfigBuilder::default()
    }

    /// Rejects settings the compiler cannot run with.
    pub fn check(&self) -> CompilerResult<()> {
        if self.workers == 0 {
            return Err(CompilerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.minimum_criteria_count == 0 {
            return Err(CompilerError::InvalidConfig(
                "minimum_criteria_count must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CompilerError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(cache) = &self.cache {
            if cache.max_entries == 0 {
                return Err(CompilerError::InvalidConfig(
                    "cache.max_entries must be at least 1".to_string(),
                ));
            }
        }
        self.vocabulary.check()?;
        Ok(())
    }
}

/// Builder for CompilerConfig.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfigBuilder {
    config: CompilerConfig,
}

impl CompilerConfigBuilder {
    /// Sets the number of concurrent normalizer calls.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Sets the run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Enables caching with the given configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Sets the minimum number of met criteria.
    pub fn with_minimum_criteria_count(mut self, count: usize) -> Self {
        self.config.minimum_criteria_count = count;
        self
    }

    /// Enables or disables alternatives to admission.
    pub fn with_include_alternatives(mut self, include: bool) -> Self {
        self.config.include_alternatives = include;
        self
    }

    /// Replaces the vocabulary tables.
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.config.vocabulary = vocabulary;
        self
    }

    /// Builds the CompilerConfig.
    pub fn build(self) -> CompilerConfig {
        self.config
    }
}

/// Configuration for the normalization cache.
///
/// # Example
///
/// ```rust
/// use guideline_compiler::CacheConfig;
/// use std::time::Duration;
///
/// let cache = CacheConfig {
///     max_entries: 10_000,
///     ttl: Some(Duration::from_secs(3600)),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached responses.
    pub max_entries: usize,
    /// Time-to-live for cached responses (None = never expire).
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: None,
        }
    }
}
