//! Choice of the boolean connective that joins a criterion's findings.
//!
//! Guideline prose rarely says explicitly whether the measurable findings
//! of one criterion must all hold or whether any of them suffices. The
//! choice is therefore pluggable.

use guideline_criteria::text::contains_word;
use guideline_criteria::LogicOperator;

/// Picks the connective for a criterion's findings.
pub trait ConnectiveStrategy: Send + Sync {
    /// Returns the operator joining `finding_count` findings of `criterion_text`.
    fn connective(&self, criterion_text: &str, finding_count: usize) -> LogicOperator;
}

/// AND when the text joins clauses with a conjunction keyword, OR otherwise.
///
/// A single finding is always joined with OR.
///
/// # Example
///
/// ```rust
/// use guideline_compiler::{ConnectiveStrategy, KeywordConnectiveStrategy};
/// use guideline_criteria::LogicOperator;
///
/// let strategy = KeywordConnectiveStrategy::default();
/// assert_eq!(strategy.connective("Hypotension and tachycardia", 2), LogicOperator::And);
/// assert_eq!(strategy.connective("Hypotension or tachycardia", 2), LogicOperator::Or);
/// assert_eq!(strategy.connective("Hypotension and tachycardia", 1), LogicOperator::Or);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordConnectiveStrategy {
    keywords: Vec<String>,
}

impl KeywordConnectiveStrategy {
    /// Creates a strategy with custom conjunction keywords.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl Default for KeywordConnectiveStrategy {
    fn default() -> Self {
        Self::new(["and", "with"])
    }
}

impl ConnectiveStrategy for KeywordConnectiveStrategy {
    fn connective(&self, criterion_text: &str, finding_count: usize) -> LogicOperator {
        if finding_count < 2 {
            return LogicOperator::Or;
        }
        let lower = criterion_text.to_lowercase();
        if self.keywords.iter().any(|k| contains_word(&lower, k)) {
            LogicOperator::And
        } else {
            LogicOperator::Or
        }
    }
}

/// Always joins findings with OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlwaysOr;

impl ConnectiveStrategy for AlwaysOr {
    fn connective(&self, _criterion_text: &str, _finding_count: usize) -> LogicOperator {
        LogicOperator::Or
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_strategy_word_bounded() {
        let strategy = KeywordConnectiveStrategy::default();
        // "Sandwich" and "without" contain the keywords only as substrings.
        assert_eq!(strategy.connective("Sandwich sign without fever", 2), LogicOperator::Or);
        assert_eq!(strategy.connective("Fever WITH rigors", 2), LogicOperator::And);
    }

    #[test]
    fn test_custom_keywords() {
        let strategy = KeywordConnectiveStrategy::new(["plus", " "]);
        assert_eq!(strategy.connective("Fever plus rash", 3), LogicOperator::And);
        assert_eq!(strategy.connective("Fever and rash", 3), LogicOperator::Or);
    }

    #[test]
    fn test_always_or() {
        assert_eq!(AlwaysOr.connective("Fever and rash", 5), LogicOperator::Or);
    }
}
