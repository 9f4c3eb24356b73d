//! # guideline-criteria
//!
//! Schema model and text analysis for clinical admission guidelines.
//!
//! This crate provides:
//! - **Schema model**: criteria, boolean rule trees, dependencies and
//!   alternatives, serialized in the persisted guideline schema layout
//! - **Vocabulary**: versioned keyword tables driving every lexical decision
//! - **Segmenter**: splits a guideline section into criterion units
//! - **Extractor**: qualifiers, conditional clause, category and primary
//!   phrase of one criterion
//! - **Threshold parser**: `"< 90 mmHg"`, `"70-100"`, `"between 36 and 38"`
//! - **Validator**: structural checks, including dependency cycles
//!
//! ## Extraction
//!
//! ```rust
//! use guideline_criteria::{extract, segment_criteria, ClinicalCategory, Vocabulary};
//!
//! let section = "Admission is indicated for any of the following:\n\
//!                • Hypotension despite fluid resuscitation\n\
//!                • Bacteremia if blood cultures were performed";
//!
//! let vocabulary = Vocabulary::default();
//! let drafts: Vec<_> = segment_criteria(section)
//!     .iter()
//!     .map(|unit| extract(unit, &vocabulary).unwrap())
//!     .collect();
//!
//! assert_eq!(drafts[0].clinical_category, ClinicalCategory::Hemodynamic);
//! assert_eq!(drafts[1].conditional_clause.as_ref().unwrap().hint, "blood cultures were performed");
//! ```
//!
//! ## Operators
//!
//! | Operator | Meaning | Required fields |
//! |----------|---------|-----------------|
//! | `less_than` | `x < value` | numeric `value` |
//! | `greater_than` | `x > value` | numeric `value` |
//! | `equals` | numeric equality or case-insensitive text match | `value` |
//! | `between` | `min < x < max` unless marked inclusive | `value_min < value_max` |
//! | `contains` | case-insensitive substring | text `value` |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
mod extractor;
mod model;
mod segment;
mod summary;
pub mod text;
mod threshold;
mod validator;
mod vocabulary;

pub use error::{CriteriaError, CriteriaResult};
pub use extractor::{extract, ConditionalClause, CriterionDraft};
pub use model::{
    criterion_id, guideline_id_from_name, AdmissionDecisionLogic, Alternative, CareSetting,
    ClinicalCategory, ComparisonOperator, ConceptCodes, Confidence, Criterion, DataType,
    Dependency, GuidelineMetadata, GuidelineSchema, LogicOperator, MatchingCondition,
    MatchingConditionGroup, MatchingNode, PrimaryCondition, Qualifiers, RequiredState, RuleType,
    ThresholdValue, UnresolvedDependency, SCHEMA_VERSION,
};
pub use segment::{parse_alternatives, segment_criteria};
pub use summary::render_summary;
pub use threshold::{parse_threshold, ParsedThreshold};
pub use validator::{validate, Severity, ValidationIssue, ValidationReport};
pub use vocabulary::{CategoryFamily, ConditionalMarker, Vocabulary, VOCABULARY_VERSION};
