//! Contract for the external concept-normalization service.
//!
//! This crate never talks to a concrete service. Callers implement
//! [`ConceptNormalizer`] for their client (an HTTP client, a local model, a
//! fixture table) and hand it to the compiler. The normalizer returns the raw
//! response body; parsing and shape checks happen in
//! [`parse_response`](crate::parse_response).
//!
//! # Example: a fixture-backed normalizer
//!
//! ```ignore
//! use guideline_compiler::{ConceptNormalizer, NormalizationRequest, NormalizerError};
//!
//! struct Fixtures(std::collections::HashMap<String, String>);
//!
//! impl ConceptNormalizer for Fixtures {
//!     fn normalize(&self, request: &NormalizationRequest) -> Result<String, NormalizerError> {
//!         self.0
//!             .get(&request.criterion_text)
//!             .cloned()
//!             .ok_or_else(|| NormalizerError::Rejected("unknown criterion".into()))
//!     }
//! }
//! ```

use std::time::Instant;

use crate::error::NormalizerError;

/// One normalization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationRequest {
    /// Criterion text to normalize.
    pub criterion_text: String,
    /// Surrounding guideline context (e.g. the guideline name).
    pub context: Option<String>,
    /// Point in time after which the result is no longer wanted.
    pub deadline: Option<Instant>,
}

impl NormalizationRequest {
    /// Creates a request without context or deadline.
    pub fn new(criterion_text: impl Into<String>) -> Self {
        Self {
            criterion_text: criterion_text.into(),
            context: None,
            deadline: None,
        }
    }

    /// Sets the surrounding context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A concept-normalization service.
///
/// Implementations must be idempotent: the service may call
/// [`normalize`](ConceptNormalizer::normalize) again for the same request
/// after a retryable error.
pub trait ConceptNormalizer: Send + Sync {
    /// Normalizes one criterion, returning the raw response body.
    fn normalize(&self, request: &NormalizationRequest) -> Result<String, NormalizerError>;
}

impl<F> ConceptNormalizer for F
where
    F: Fn(&NormalizationRequest) -> Result<String, NormalizerError> + Send + Sync,
{
    fn normalize(&self, request: &NormalizationRequest) -> Result<String, NormalizerError> {
        self(request)
    }
}
