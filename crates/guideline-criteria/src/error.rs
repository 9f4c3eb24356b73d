//! Error types for criterion extraction and vocabulary loading.

use thiserror::Error;

/// Errors that can occur while extracting or parsing criterion text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    /// The criterion text was empty after whitespace normalization.
    #[error("criterion text is empty")]
    EmptyCriterion,

    /// Threshold text could not be parsed.
    #[error("threshold parse error at position {position}: {message}")]
    ThresholdParse {
        /// Position in the input where parsing stopped.
        position: usize,
        /// Description of the error.
        message: String,
    },

    /// A vocabulary table could not be loaded or is inconsistent.
    #[error("invalid vocabulary: {0}")]
    Vocabulary(String),
}

/// Result type for criteria operations.
pub type CriteriaResult<T> = std::result::Result<T, CriteriaError>;
