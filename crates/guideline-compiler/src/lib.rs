//! # guideline-compiler
//!
//! Compiles admission-criteria prose into an executable [`GuidelineSchema`].
//!
//! This crate provides:
//! - **Normalizer contract**: [`ConceptNormalizer`] for the external
//!   concept-normalization service, plus [`parse_response`] for its output
//! - **Normalization service**: bounded worker pool, retry with backoff,
//!   run timeout and an LRU response cache with on-disk snapshots
//! - **Rule compiler**: matching-condition trees, category and qualifier
//!   merge, dependency resolution and per-criterion fallback
//! - **Export**: persisted JSON schema and text summary
//!
//! ## Quick Start
//!
//! ```rust
//! use guideline_compiler::{
//!     CompilerConfig, GuidelineCompiler, GuidelineSource, NormalizationRequest, NormalizerError,
//! };
//! use guideline_criteria::{GuidelineMetadata, LogicOperator};
//!
//! // A normalizer that knows a single criterion.
//! let normalizer = |request: &NormalizationRequest| -> Result<String, NormalizerError> {
//!     if request.criterion_text.starts_with("Hypotension") {
//!         Ok(r#"{
//!             "primary_condition": {"term": "Hypotension", "codes": {"snomed": "45007003"}},
//!             "clinical_findings": [
//!                 {"parameter": "systolic blood pressure", "operator": "<", "value": 90, "unit": "mmHg"}
//!             ]
//!         }"#.to_string())
//!     } else {
//!         Err(NormalizerError::Rejected("unknown criterion".to_string()))
//!     }
//! };
//!
//! let section = "Admission is indicated for any of the following:\n\
//!                • Hypotension with systolic blood pressure below 90 mmHg\n\
//!                • Altered mental status";
//!
//! let compiler = GuidelineCompiler::new(normalizer, CompilerConfig::default()).unwrap();
//! let compiled = compiler
//!     .build(&GuidelineSource::from_section(GuidelineMetadata::from_name("Shock"), section))
//!     .unwrap();
//!
//! let criteria = compiled.schema.criteria();
//! assert_eq!(criteria.len(), 2);
//! assert_eq!(criteria[0].matching_conditions.leaves()[0].parameter, "systolic_bp");
//! assert_eq!(criteria[0].matching_conditions.logic_operator, LogicOperator::Or);
//! assert_eq!(compiled.report.fallback_count, 1);
//! assert!(compiled.validation.ok);
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` (default) - Normalizer calls run on a rayon thread pool;
//!   without it they run sequentially

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod compiler;
mod config;
mod error;
mod export;
mod normalizer;
mod resolver;
mod response;
mod retry;
mod service;
mod strategy;

pub use cache::{CacheStats, NormalizationCache};
pub use compiler::{
    CompilationReport, CompilationWarning, CompiledGuideline, GuidelineCompiler,
    GuidelineSource, RuleCompiler, SourceCriteria, WarningKind,
};
pub use config::{CacheConfig, CompilerConfig, CompilerConfigBuilder, DEFAULT_WORKERS};
pub use error::{
    CompilerError, CompilerResult, NormalizationFailure, NormalizerError, ResponseError,
};
pub use export::{export_schema, export_summary, load_schema, ExportReceipt};
pub use normalizer::{ConceptNormalizer, NormalizationRequest};
pub use resolver::{DependencyHint, DependencyResolver, UnresolvedHint};
pub use response::{
    extract_json_block, parse_response, AssertedValue, FindingAssertion, NormalizerResponse,
    ResponseQualifiers,
};
pub use retry::RetryPolicy;
pub use service::{NormalizationOutcome, NormalizationService};
pub use strategy::{AlwaysOr, ConnectiveStrategy, KeywordConnectiveStrategy};

pub use guideline_criteria::GuidelineSchema;
