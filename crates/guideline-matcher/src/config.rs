//! Configuration types for the matching engine.

use guideline_criteria::Vocabulary;

/// Configuration for the matching engine.
///
/// # Example
///
/// ```rust
/// use guideline_matcher::MatcherConfig;
/// use guideline_criteria::Vocabulary;
///
/// let config = MatcherConfig::builder()
///     .with_derived_values(false)
///     .with_vocabulary(Vocabulary::default())
///     .build();
/// assert!(!config.derived_values);
/// ```
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Compute shock index, mean arterial pressure and pulse pressure
    /// before evaluating.
    pub derived_values: bool,
    /// Tables used to canonicalize parameter names on both sides of a lookup.
    pub vocabulary: Vocabulary,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            derived_values: true,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl MatcherConfig {
    /// Creates a new builder for MatcherConfig.
    pub fn builder() -> MatcherConfigBuilder {
        MatcherConfigBuilder::default()
    }
}

/// Builder for MatcherConfig.
#[derive(Debug, Clone, Default)]
pub struct MatcherConfigBuilder {
    config: MatcherConfig,
}

impl MatcherConfigBuilder {
    /// Enables or disables derived values.
    pub fn with_derived_values(mut self, enabled: bool) -> Self {
        self.config.derived_values = enabled;
        self
    }

    /// Sets the vocabulary.
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.config.vocabulary = vocabulary;
        self
    }

    /// Builds the MatcherConfig.
    pub fn build(self) -> MatcherConfig {
        self.config
    }
}
