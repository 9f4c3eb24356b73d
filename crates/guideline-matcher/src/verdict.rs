//! Verdicts and the evaluation report.

use std::collections::BTreeMap;
use std::fmt;

use guideline_criteria::RequiredState;
use serde::{Deserialize, Serialize};

use crate::dataset::{DatumValue, Section, SkippedDatum};

/// Outcome of one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The matching-condition tree evaluated to true.
    Met,
    /// The matching-condition tree evaluated to false.
    NotMet,
    /// A dependency was not satisfied; the tree was never evaluated.
    NotApplicable {
        /// Which dependency blocked the criterion.
        reason: String,
    },
}

impl Verdict {
    /// Returns true for [`Verdict::Met`].
    pub fn is_met(&self) -> bool {
        matches!(self, Verdict::Met)
    }

    /// Returns true for [`Verdict::NotApplicable`].
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Verdict::NotApplicable { .. })
    }

    /// The dependency state this verdict satisfies, if any.
    pub fn state(&self) -> Option<RequiredState> {
        match self {
            Verdict::Met => Some(RequiredState::Met),
            Verdict::NotMet => Some(RequiredState::NotMet),
            Verdict::NotApplicable { .. } => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Met => write!(f, "met"),
            Verdict::NotMet => write!(f, "not_met"),
            Verdict::NotApplicable { reason } => write!(f, "not_applicable ({reason})"),
        }
    }
}

/// How a leaf condition was checked against the patient data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Canonical parameter of the condition.
    pub parameter: String,
    /// The condition, e.g. `less_than(systolic_bp, 90 mmHg)`.
    pub condition: String,
    /// Value the condition was compared with; `None` when no datum was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<DatumValue>,
    /// Unit of the observed value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    /// Section the value came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    /// The datum was found by code rather than by name.
    #[serde(default)]
    pub matched_by_code: bool,
    /// Whether the condition held.
    pub satisfied: bool,
}

/// Result of evaluating a schema against one patient dataset.
///
/// All maps are ordered, so the serialized report is byte-identical for
/// identical inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictReport {
    /// Guideline the report belongs to.
    pub guideline_id: String,
    /// True iff `met_count >= minimum_criteria_count`.
    pub admission_indicated: bool,
    /// Met criteria needed for admission.
    pub minimum_criteria_count: usize,
    /// Number of met criteria.
    pub met_count: usize,
    /// Met criteria in declaration order.
    pub matched_criterion_ids: Vec<String>,
    /// Verdict of every criterion.
    pub per_criterion: BTreeMap<String, Verdict>,
    /// Leaf checks of every evaluated criterion.
    pub evidence: BTreeMap<String, Vec<Evidence>>,
    /// Values computed for this evaluation.
    pub derived_values: BTreeMap<String, f64>,
    /// Data left out of the evaluation.
    pub skipped_data: Vec<SkippedDatum>,
}

impl VerdictReport {
    /// Verdict of one criterion.
    pub fn verdict(&self, criterion_id: &str) -> Option<&Verdict> {
        self.per_criterion.get(criterion_id)
    }

    /// Number of criteria that were blocked by a dependency.
    pub fn not_applicable_count(&self) -> usize {
        self.per_criterion
            .values()
            .filter(|v| v.is_not_applicable())
            .count()
    }
}

impl fmt::Display for VerdictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verdict for {}:", self.guideline_id)?;
        writeln!(
            f,
            "  Admission:  {}",
            if self.admission_indicated { "indicated" } else { "not indicated" }
        )?;
        writeln!(
            f,
            "  Met:        {} of {} (minimum {})",
            self.met_count,
            self.per_criterion.len(),
            self.minimum_criteria_count
        )?;
        for (id, verdict) in &self.per_criterion {
            writeln!(f, "  {id}: {verdict}")?;
        }
        if !self.derived_values.is_empty() {
            writeln!(f, "  Derived:")?;
            for (name, value) in &self.derived_values {
                writeln!(f, "    {name} = {value:.2}")?;
            }
        }
        if !self.skipped_data.is_empty() {
            writeln!(f, "  Skipped:    {}", self.skipped_data.len())?;
        }
        Ok(())
    }
}
