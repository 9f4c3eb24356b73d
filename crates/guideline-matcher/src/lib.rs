//! # guideline-matcher
//!
//! Evaluates a compiled admission schema against a patient's structured
//! clinical data.
//!
//! ## Key Features
//!
//! - **Schema gate** - invalid schemas and dependency cycles are refused
//!   before any evaluation
//! - **Derived values** - shock index, mean arterial pressure and pulse
//!   pressure are computed per evaluation and usable like observed data
//! - **Dependency short-circuit** - a criterion whose dependency is not
//!   satisfied is `not_applicable`, never `not_met`
//! - **Missing data is false** - a leaf without a datum does not match
//! - **Deterministic reports** - ordered maps only; identical inputs give
//!   byte-identical JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use guideline_criteria::{
//!     Criterion, DataType, GuidelineMetadata, GuidelineSchema, MatchingCondition,
//!     MatchingConditionGroup, RequiredState, ThresholdValue,
//! };
//! use guideline_matcher::{evaluate, PatientDataset, PatientDatum, Verdict};
//!
//! let cultures = Criterion::new(
//!     "criterion_001",
//!     "Blood cultures performed",
//!     MatchingConditionGroup::any([MatchingCondition::equals(
//!         "blood_cultures_performed",
//!         DataType::Laboratory,
//!         ThresholdValue::Bool(true),
//!     )]),
//! );
//! let bacteremia = Criterion::new(
//!     "criterion_002",
//!     "Bacteremia if blood cultures were performed",
//!     MatchingConditionGroup::any([MatchingCondition::equals(
//!         "blood_culture",
//!         DataType::Laboratory,
//!         ThresholdValue::Text("positive".into()),
//!     )]),
//! )
//! .with_dependency("criterion_001", RequiredState::Met);
//!
//! let schema = GuidelineSchema::new(
//!     GuidelineMetadata::from_name("Bacteremia"),
//!     vec![cultures, bacteremia],
//!     1,
//! );
//!
//! // No blood-culture data at all.
//! let dataset = PatientDataset::new().with_vital_sign(PatientDatum::new("heart_rate", 96.0));
//! let report = evaluate(&schema, &dataset).unwrap();
//!
//! assert_eq!(report.per_criterion["criterion_001"], Verdict::NotMet);
//! assert!(report.per_criterion["criterion_002"].is_not_applicable());
//! assert!(!report.admission_indicated);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! schema ──validate──▶ MatchingEngine (topological order)
//!                             │
//! dataset ──index──▶ observations + derived values
//!                             │
//!                     per-criterion verdicts ──▶ VerdictReport
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod dataset;
mod derived;
mod engine;
mod error;
mod observations;
mod verdict;

pub use config::{MatcherConfig, MatcherConfigBuilder};
pub use dataset::{DatumValue, Flag, PatientDataset, PatientDatum, Section, SkippedDatum};
pub use derived::{MEAN_ARTERIAL_PRESSURE, PULSE_PRESSURE, SHOCK_INDEX};
pub use engine::{condition_holds, evaluate, MatchingEngine};
pub use error::{MatcherError, MatcherResult};
pub use verdict::{Evidence, Verdict, VerdictReport};
