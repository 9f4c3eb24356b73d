//! Error types for schema matching.

use guideline_criteria::ValidationIssue;
use thiserror::Error;

/// Errors that stop an evaluation before it starts.
///
/// Problems with individual patient data are never errors: they are
/// reported as [`SkippedDatum`](crate::SkippedDatum)s and evaluation goes on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    /// The schema failed validation.
    #[error("schema invalid: {} error(s), first: {}", .issues.len(), first_issue(.issues))]
    SchemaInvalid {
        /// Error-level issues reported by the validator.
        issues: Vec<ValidationIssue>,
    },

    /// The dependency graph of the schema contains a cycle.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle {
        /// Closed cycle path, first id repeated at the end.
        path: Vec<String>,
    },

    /// A patient dataset could not be read at all.
    #[error("dataset error: {0}")]
    Dataset(String),
}

fn first_issue(issues: &[ValidationIssue]) -> String {
    issues
        .first()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Result type for matcher operations.
pub type MatcherResult<T> = std::result::Result<T, MatcherError>;
