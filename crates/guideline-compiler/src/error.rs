//! Error types for the compiler crate.
//!
//! Only configuration and I/O problems are surfaced as [`CompilerError`].
//! Per-criterion problems (normalizer failures, malformed responses) are
//! isolated: they degrade the affected criterion and show up in the
//! compilation report instead.

use std::path::PathBuf;
use std::time::Duration;

use guideline_criteria::CriteriaError;
use thiserror::Error;

/// Result type for compiler operations.
pub type CompilerResult<T> = Result<T, CompilerError>;

/// Errors that abort a compiler operation.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// I/O error while reading or writing a file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A cache snapshot entry does not match its recorded fingerprint.
    #[error("hash mismatch for cache entry: expected {expected}, got {actual}")]
    HashMismatch {
        /// Fingerprint stored in the snapshot.
        expected: String,
        /// Fingerprint computed from the entry key.
        actual: String,
    },

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from criterion analysis.
    #[error(transparent)]
    Criteria(#[from] CriteriaError),
}

impl CompilerError {
    /// Creates an I/O error with path context.
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by a [`ConceptNormalizer`](crate::ConceptNormalizer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizerError {
    /// The service could not be reached or the call failed in transit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete in time.
    #[error("normalizer call timed out after {0:?}")]
    Timeout(Duration),

    /// The service refused the request; retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl NormalizerError {
    /// Returns true if the call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// A normalizer response that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// No JSON object could be located in the response body.
    #[error("no JSON object in normalizer response")]
    NoJson,

    /// The JSON is malformed or has wrongly typed fields.
    #[error("malformed response JSON: {0}")]
    Json(String),

    /// A field is present but unusable.
    #[error("invalid response field {field}: {message}")]
    Shape {
        /// Path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ResponseError {
    pub(crate) fn shape(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shape {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Why a criterion has no usable normalized concept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationFailure {
    /// All attempts failed, or the failure was not retryable.
    #[error("normalizer unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable {
        /// Calls made.
        attempts: u32,
        /// Error of the final call.
        last_error: NormalizerError,
    },

    /// The run deadline passed before the criterion was normalized.
    #[error("normalization timed out")]
    TimedOut,

    /// The response could not be used.
    #[error(transparent)]
    Malformed(#[from] ResponseError),

    /// No outcome was supplied for the criterion.
    #[error("no normalizer outcome for this criterion")]
    Missing,
}
